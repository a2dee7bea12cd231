mod app;
mod pages;

use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = app::Cli::parse();
    ytdl_desk_lib::logging::init(cli.log_file);
    tracing::debug!("ytdl-desk starting; log_file={}", cli.log_file);

    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
