pub mod database;
pub mod download;
pub mod library;
pub mod logging;
pub mod settings;
pub mod utils;

pub use database::{Database, HistoryEntry};
pub use download::error::{TaskError, TaskErrorKind};
pub use download::manager::{
    channel_emitter, EventEmitter, ExtractionOutcome, Extractor, ProgressHook, TaskController,
    TaskEvent, TaskState,
};
pub use download::progress::{ProgressPayload, ProgressStatus, ProgressUpdate};
pub use download::request::{DownloadRequest, FormatPreset, PostProcess};
pub use download::ytdlp::YtDlp;
pub use settings::PreferenceStore;
