use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::error::TaskError;
use super::manager::{ExtractionOutcome, Extractor, ProgressHook};
use super::progress::{ProgressPayload, ProgressStatus};
use super::request::{DownloadRequest, PostProcess};

/// Marks the lines our `--progress-template` produces.
pub const PROGRESS_MARK: &str = "[ytdl-desk:progress]";
/// Marks the `--print after_move:` metadata line.
pub const META_MARK: &str = "[ytdl-desk:meta]";

const IDLE_TIMEOUT: Duration = Duration::from_secs(180);
const STDERR_TAIL: usize = 20;

/// Extractor backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    prefix_args: Vec<String>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Program plus arguments that go before ours, e.g. `python3 -m yt_dlp`.
    pub fn with_prefix_args(program: impl Into<PathBuf>, prefix_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
        }
    }

    /// Parse a whitespace-separated command line such as `"python3 -m yt_dlp"`.
    /// Blank input falls back to plain `yt-dlp`.
    pub fn from_command_line(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(program) => Self::with_prefix_args(program, parts.map(String::from).collect()),
            None => Self::default(),
        }
    }
}

pub fn build_args(request: &DownloadRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--ignore-config".into(),
        "--newline".into(),
        // --print implies --quiet; keep progress lines coming anyway
        "--progress".into(),
        "--no-warnings".into(),
        "--progress-template".into(),
        format!(
            "download:{PROGRESS_MARK}%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s"
        ),
        "--print".into(),
        format!("after_move:{META_MARK}%(.{{title,ext,filepath}})j"),
        "-f".into(),
        request.format().to_string(),
        "-o".into(),
        request.output_template(),
    ];
    if request.post_process() == PostProcess::AudioExtract {
        args.extend(vec![
            "-x".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--audio-quality".into(),
            "192K".into(),
        ]);
    }
    // URL last
    args.push("--".into());
    args.push(request.url().to_string());
    args
}

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(ProgressPayload),
    Meta(ExtractionOutcome),
}

#[derive(Deserialize)]
struct MetaLine {
    title: Option<String>,
    ext: Option<String>,
    filepath: Option<String>,
}

fn parse_line(line: &str) -> Option<OutputLine> {
    let l = line.trim();
    if let Some(rest) = l.strip_prefix(PROGRESS_MARK) {
        let mut fields = rest.splitn(4, '|');
        let status = ProgressStatus::from(fields.next().unwrap_or(""));
        let mut field = || fields.next().map(str::to_string);
        return Some(OutputLine::Progress(ProgressPayload {
            status,
            percent: field(),
            speed: field(),
            eta: field(),
        }));
    }
    if let Some(rest) = l.strip_prefix(META_MARK) {
        return match serde_json::from_str::<MetaLine>(rest) {
            Ok(m) => Some(OutputLine::Meta(ExtractionOutcome {
                title: m.title,
                ext: m.ext,
                filepath: m.filepath.filter(|p| !p.is_empty()).map(PathBuf::from),
            })),
            Err(e) => {
                tracing::warn!("unreadable yt-dlp metadata line: {e}");
                None
            }
        };
    }
    None
}

/// Next newline-terminated line, decoded lossily; yt-dlp output is not
/// guaranteed to be UTF-8 (console code pages, odd titles).
async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R) -> Vec<String> {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(Some(line)) = next_line_lossy(&mut reader, &mut buf).await {
        let l = line.trim();
        if l.is_empty() {
            continue;
        }
        tracing::debug!(target: "yt-dlp", "{l}");
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(l.to_string());
    }
    tail.into_iter().collect()
}

/// Prefer yt-dlp's own `ERROR:` line, then whatever it said last.
fn failure_message(stderr_tail: &[String], status: ExitStatus) -> String {
    stderr_tail
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr_tail.last())
        .cloned()
        .unwrap_or_else(|| format!("yt-dlp exited with {status}"))
}

#[async_trait]
impl Extractor for YtDlp {
    async fn extract(
        &self,
        request: &DownloadRequest,
        hook: ProgressHook,
    ) -> Result<ExtractionOutcome, TaskError> {
        let args = build_args(request);
        tracing::debug!("[yt-dlp] {} {:?} {:?}", self.program.display(), self.prefix_args, args);

        let mut child = Command::new(&self.program)
            .args(&self.prefix_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // an early return (cancel, timeout) drops the child and kills it
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskError::failed(format!("spawn {} failed: {e}", self.program.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::failed("yt-dlp stdout unavailable"))?;
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s)));

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut outcome = ExtractionOutcome::default();
        loop {
            let line = match timeout(IDLE_TIMEOUT, next_line_lossy(&mut reader, &mut buf)).await {
                Ok(Ok(Some(l))) => l,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(TaskError::failed(format!("reading yt-dlp output: {e}"))),
                Err(_) => {
                    tracing::error!("yt-dlp timed out (no output for {}s)", IDLE_TIMEOUT.as_secs());
                    return Err(TaskError::failed("yt-dlp timed out"));
                }
            };
            match parse_line(&line) {
                Some(OutputLine::Progress(p)) => hook.report(&p).await?,
                Some(OutputLine::Meta(m)) => outcome = m,
                None => tracing::debug!(target: "yt-dlp", "{}", line.trim()),
            }
        }

        let status = child.wait().await?;
        let stderr_tail = match stderr_task {
            Some(t) => t.await.unwrap_or_default(),
            None => Vec::new(),
        };
        if !status.success() {
            return Err(TaskError::failed(failure_message(&stderr_tail, status)));
        }
        Ok(outcome)
    }
}
