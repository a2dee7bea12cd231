pub mod control;
pub mod error;
pub mod manager;
pub mod progress;
pub mod request;
pub mod ytdlp;
