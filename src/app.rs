use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ytdl_desk_lib::{Database, FormatPreset, PreferenceStore, YtDlp};

use crate::pages;

#[derive(Debug, Parser)]
#[command(name = "ytdl-desk", version, about = "Download media with yt-dlp and keep a local history")]
pub struct Cli {
    /// Settings file (defaults to the per-user config dir)
    #[arg(long, global = true, env = "YTDL_DESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// History database file
    #[arg(long, global = true, env = "YTDL_DESK_DB")]
    pub db: Option<PathBuf>,

    /// yt-dlp command line, e.g. "yt-dlp" or "python3 -m yt_dlp"
    #[arg(long = "yt-dlp", global = true, env = "YTDL_DESK_YTDLP", default_value = "yt-dlp")]
    pub yt_dlp: String,

    /// Also write logs to rotating files in the config dir
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download one URL; type p / r / c + Enter to pause, resume or cancel
    Download(DownloadArgs),
    /// Completed downloads
    #[command(subcommand)]
    History(HistoryCommand),
    /// Stored preferences
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    pub url: String,

    #[arg(long, short, value_enum, default_value_t = FormatArg::Best)]
    pub format: FormatArg,

    /// Destination directory (defaults to the `download_path` setting)
    #[arg(long, short)]
    pub dir: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    /// Best video + audio
    Best,
    /// Audio only, converted to mp3
    Audio,
    #[value(name = "720p")]
    P720,
    #[value(name = "1080p")]
    P1080,
    /// Same selection as best
    Mkv,
}

impl From<FormatArg> for FormatPreset {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Best => FormatPreset::Best,
            FormatArg::Audio => FormatPreset::Audio,
            FormatArg::P720 => FormatPreset::P720,
            FormatArg::P1080 => FormatPreset::P1080,
            FormatArg::Mkv => FormatPreset::Mkv,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// Newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Open the downloaded file with the default application
    Open { id: i64 },
    /// Forget an entry and delete its file
    Delete {
        id: i64,
        /// Leave the file on disk
        #[arg(long)]
        keep_file: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    Show,
    Get { key: String },
    /// Set and save a value (booleans and numbers are stored as JSON)
    Set { key: String, value: String },
}

/// Everything a page needs, opened once per invocation.
pub struct Context {
    pub prefs: PreferenceStore,
    pub db: Database,
    pub extractor: YtDlp,
}

impl Context {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let prefs = match &cli.config {
            Some(path) => {
                let mut p = PreferenceStore::new(path);
                p.load();
                p
            }
            None => PreferenceStore::open_default(),
        };
        let db = match &cli.db {
            Some(path) => Database::open(path),
            None => Database::open_default(),
        }
        .context("failed to open history database")?;

        Ok(Self {
            prefs,
            db,
            extractor: YtDlp::from_command_line(&cli.yt_dlp),
        })
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut ctx = Context::open(&cli)?;
    tracing::debug!("settings at {}", ctx.prefs.path().display());

    match cli.command {
        Command::Download(args) => pages::home::download(&ctx, args).await,
        Command::History(cmd) => pages::history::run(&ctx, cmd),
        Command::Settings(cmd) => pages::settings::run(&mut ctx.prefs, cmd),
    }
}
