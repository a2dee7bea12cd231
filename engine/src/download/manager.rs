use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::control::{RunState, TaskControl};
use super::error::TaskError;
use super::progress::{ProgressPayload, ProgressStatus, ProgressUpdate};
use super::request::DownloadRequest;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const DEFAULT_EXT: &str = "mp4";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskEvent {
    Progress(ProgressUpdate),
    Completed {
        title: String,
        filepath: String,
        url: String,
    },
    Failed {
        error: TaskError,
    },
}

/// Observer callback. Invoked from whichever task produced the event.
pub type EventEmitter = Arc<dyn Fn(TaskEvent) + Send + Sync>;

/// Emitter that forwards into a channel, so the foreground handles events on
/// its own turn.
pub fn channel_emitter() -> (EventEmitter, mpsc::UnboundedReceiver<TaskEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let emitter: EventEmitter = Arc::new(move |event: TaskEvent| {
        if tx.send(event).is_err() {
            tracing::debug!("task event dropped; observer is gone");
        }
    });
    (emitter, rx)
}

/// What the extractor knows once the download is done. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOutcome {
    pub title: Option<String>,
    pub ext: Option<String>,
    /// Final on-disk path after post-processing, when the extractor reports it.
    pub filepath: Option<PathBuf>,
}

/// The external download/extraction call.
///
/// Implementations must call [`ProgressHook::report`] for every progress tick
/// and abort with its error when it returns one.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        request: &DownloadRequest,
        hook: ProgressHook,
    ) -> Result<ExtractionOutcome, TaskError>;
}

/// Handed to the extractor; applies pause/cancel and relays parsed progress.
#[derive(Clone)]
pub struct ProgressHook {
    control: TaskControl,
    emitter: EventEmitter,
}

impl ProgressHook {
    pub fn new(control: TaskControl, emitter: EventEmitter) -> Self {
        Self { control, emitter }
    }

    /// Parks while paused and fails once cancelled. Only `downloading` ticks
    /// reach the observer.
    pub async fn report(&self, payload: &ProgressPayload) -> Result<(), TaskError> {
        self.control.checkpoint().await?;
        if payload.status == ProgressStatus::Downloading {
            (self.emitter)(TaskEvent::Progress(ProgressUpdate::from_payload(payload)));
        }
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Paused,
}

/// Runs at most one download at a time on a background tokio task.
#[derive(Clone)]
pub struct TaskController {
    extractor: Arc<dyn Extractor>,
    emitter: EventEmitter,
    active: Arc<AtomicBool>,
    current: Arc<Mutex<Option<TaskControl>>>,
}

impl fmt::Debug for TaskController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Frees the slot when the task ends, even by panic. Taking the control out
/// under the lock is what decides between a late cancel and completion.
struct SlotGuard {
    active: Arc<AtomicBool>,
    current: Arc<Mutex<Option<TaskControl>>>,
    released: bool,
}

impl SlotGuard {
    /// Release the slot; reports whether a cancel got in before release.
    fn release(mut self) -> bool {
        self.free()
    }

    fn free(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        let cancelled = match self.current.lock() {
            Ok(mut c) => c.take().map(|ctl| ctl.is_cancelled()).unwrap_or(false),
            Err(_) => false,
        };
        self.active.store(false, Ordering::Release);
        cancelled
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.free();
    }
}

impl TaskController {
    pub fn new(extractor: Arc<dyn Extractor>, emitter: EventEmitter) -> Self {
        Self {
            extractor,
            emitter,
            active: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Accept `request` if idle and spawn it. Must be called inside a tokio runtime.
    ///
    /// A busy rejection is returned and also emitted to the observer.
    pub fn start(&self, request: DownloadRequest) -> Result<(), TaskError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let err = TaskError::busy();
            tracing::warn!("rejected {}: {}", request.url(), err);
            (self.emitter)(TaskEvent::Failed { error: err.clone() });
            return Err(err);
        }

        let control = TaskControl::new();
        if let Ok(mut c) = self.current.lock() {
            *c = Some(control.clone());
        }
        let slot = SlotGuard {
            active: self.active.clone(),
            current: self.current.clone(),
            released: false,
        };

        tracing::info!(
            "starting download url={} dest={} format={} post={:?}",
            request.url(),
            request.destination().display(),
            request.format(),
            request.post_process()
        );

        let extractor = self.extractor.clone();
        let emitter = self.emitter.clone();
        let hook = ProgressHook::new(control, emitter.clone());
        tokio::spawn(async move {
            // a panicking extractor still has to end in a terminal event
            let job = {
                let request = request.clone();
                tokio::spawn(async move { extractor.extract(&request, hook).await })
            };
            let result = match job.await {
                Ok(r) => r,
                Err(e) => Err(TaskError::failed(format!("download task aborted: {e}"))),
            };
            let cancelled_late = slot.release();

            let event = match result {
                Ok(_) if cancelled_late => {
                    tracing::info!("download finished after cancel; reporting cancelled");
                    TaskEvent::Failed { error: TaskError::cancelled() }
                }
                Ok(outcome) => completion_event(&request, outcome),
                Err(error) => {
                    if error.is_cancelled() {
                        tracing::info!("download cancelled: {}", request.url());
                    } else {
                        tracing::error!("download failed: {} ({})", request.url(), error);
                    }
                    TaskEvent::Failed { error }
                }
            };
            (emitter)(event);
        });
        Ok(())
    }

    /// Returns true if a running task was paused.
    pub fn pause(&self) -> bool {
        self.with_current(|c| c.pause())
    }

    /// Returns true if a paused task was resumed.
    pub fn resume(&self) -> bool {
        self.with_current(|c| c.resume())
    }

    /// Returns true if an active task was told to cancel.
    pub fn cancel(&self) -> bool {
        self.with_current(|c| c.cancel())
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TaskState {
        let current = self.current.lock().ok().and_then(|c| c.as_ref().map(|c| c.state()));
        match current {
            None => TaskState::Idle,
            Some(RunState::Paused) => TaskState::Paused,
            // a cancelled task is still winding down
            Some(_) => TaskState::Running,
        }
    }

    fn with_current(&self, f: impl FnOnce(&TaskControl) -> bool) -> bool {
        match self.current.lock() {
            Ok(c) => c.as_ref().map(f).unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn completion_event(request: &DownloadRequest, outcome: ExtractionOutcome) -> TaskEvent {
    let title = outcome
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let ext = outcome.ext.unwrap_or_else(|| DEFAULT_EXT.to_string());
    let filepath = outcome
        .filepath
        .unwrap_or_else(|| request.conventional_path(&title, &ext));

    tracing::info!("download finished: {title} -> {}", filepath.display());
    TaskEvent::Completed {
        title,
        filepath: filepath.to_string_lossy().to_string(),
        url: request.url().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::error::TaskErrorKind;
    use crate::download::request::{FormatPreset, PostProcess};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Test extractor driven step by step: every payload pushed into the
    /// script is reported through the hook; closing the script ends the
    /// download with `outcome`.
    struct ScriptedExtractor {
        script: Mutex<Option<mpsc::UnboundedReceiver<ProgressPayload>>>,
        outcome: Result<ExtractionOutcome, TaskError>,
    }

    impl ScriptedExtractor {
        fn new(
            outcome: Result<ExtractionOutcome, TaskError>,
        ) -> (Arc<Self>, mpsc::UnboundedSender<ProgressPayload>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let ex = Arc::new(Self {
                script: Mutex::new(Some(rx)),
                outcome,
            });
            (ex, tx)
        }
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        async fn extract(
            &self,
            _request: &DownloadRequest,
            hook: ProgressHook,
        ) -> Result<ExtractionOutcome, TaskError> {
            let rx = self.script.lock().unwrap().take();
            let Some(mut rx) = rx else {
                return Err(TaskError::failed("script already used"));
            };
            while let Some(payload) = rx.recv().await {
                hook.report(&payload).await?;
            }
            self.outcome.clone()
        }
    }

    fn song() -> ExtractionOutcome {
        ExtractionOutcome {
            title: Some("Song".into()),
            ext: Some("m4a".into()),
            filepath: None,
        }
    }

    fn audio_request() -> DownloadRequest {
        DownloadRequest::new(
            "https://example/video",
            "/tmp/out",
            "bestaudio",
            PostProcess::AudioExtract,
        )
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> TaskEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("emitter dropped")
    }

    async fn nothing_within(rx: &mut mpsc::UnboundedReceiver<TaskEvent>, ms: u64) -> bool {
        timeout(Duration::from_millis(ms), rx.recv()).await.is_err()
    }

    fn percent_of(ev: &TaskEvent) -> f32 {
        match ev {
            TaskEvent::Progress(u) => u.percent,
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completes_with_conventional_audio_path() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        script.send(ProgressPayload::downloading("50.0%", "1MiB/s", "00:03")).unwrap();
        assert_eq!(percent_of(&next(&mut rx).await), 50.0);
        drop(script);

        match next(&mut rx).await {
            TaskEvent::Completed { title, filepath, url } => {
                assert_eq!(title, "Song");
                assert_eq!(PathBuf::from(filepath), PathBuf::from("/tmp/out/Song.mp3"));
                assert_eq!(url, "https://example/video");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ctl.state(), TaskState::Idle);
        assert!(!ctl.is_busy());
    }

    #[tokio::test]
    async fn resolved_path_wins_over_convention() {
        let outcome = ExtractionOutcome {
            title: Some("Song".into()),
            ext: Some("mp3".into()),
            filepath: Some(PathBuf::from("/tmp/out/Song (Official).mp3")),
        };
        let (ex, script) = ScriptedExtractor::new(Ok(outcome));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        drop(script);
        match next(&mut rx).await {
            TaskEvent::Completed { filepath, .. } => {
                assert_eq!(filepath, "/tmp/out/Song (Official).mp3")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_metadata_uses_defaults() {
        let (ex, script) = ScriptedExtractor::new(Ok(ExtractionOutcome::default()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(DownloadRequest::from_preset("u", "/dl", FormatPreset::Best)).unwrap();
        drop(script);
        match next(&mut rx).await {
            TaskEvent::Completed { title, filepath, .. } => {
                assert_eq!(title, UNKNOWN_TITLE);
                assert_eq!(PathBuf::from(filepath), PathBuf::from("/dl/Unknown Title.mp4"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_active() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        let err = ctl.start(audio_request()).unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Busy);
        match next(&mut rx).await {
            TaskEvent::Failed { error } => assert_eq!(error.kind, TaskErrorKind::Busy),
            other => panic!("unexpected {other:?}"),
        }

        // pausing doesn't free the slot either
        assert!(ctl.pause());
        assert_eq!(ctl.start(audio_request()).unwrap_err().kind, TaskErrorKind::Busy);
        let _ = next(&mut rx).await;
        assert!(ctl.resume());

        drop(script);
        assert!(matches!(next(&mut rx).await, TaskEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn slot_frees_after_terminal_event() {
        let (first, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(first, emitter.clone());
        ctl.start(audio_request()).unwrap();
        drop(script);
        assert!(matches!(next(&mut rx).await, TaskEvent::Completed { .. }));

        // the one-shot script is used up, so the second run fails, but it is accepted
        ctl.start(audio_request()).unwrap();
        match next(&mut rx).await {
            TaskEvent::Failed { error } => assert_eq!(error.kind, TaskErrorKind::Failed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_starts_admit_exactly_one() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, _rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = ctl.clone();
            handles.push(tokio::spawn(async move { c.start(audio_request()).is_ok() }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        drop(script);
    }

    #[tokio::test]
    async fn cancel_after_progress_never_completes() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        script.send(ProgressPayload::downloading("99.9%", "", "")).unwrap();
        assert_eq!(percent_of(&next(&mut rx).await), 99.9);

        assert!(ctl.cancel());
        script.send(ProgressPayload::downloading("100%", "", "")).unwrap();
        match next(&mut rx).await {
            TaskEvent::Failed { error } => assert!(error.is_cancelled()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!ctl.is_busy());
        assert!(!ctl.cancel());
    }

    #[tokio::test]
    async fn cancel_then_successful_return_reports_cancelled() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        assert!(ctl.cancel());
        // extractor returns Ok without another progress tick
        drop(script);
        match next(&mut rx).await {
            TaskEvent::Failed { error } => assert!(error.is_cancelled()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_wakes_a_paused_task() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        assert!(ctl.pause());
        assert_eq!(ctl.state(), TaskState::Paused);
        script.send(ProgressPayload::downloading("10%", "", "")).unwrap();
        assert!(nothing_within(&mut rx, 50).await);

        assert!(ctl.cancel());
        match next(&mut rx).await {
            TaskEvent::Failed { error } => assert!(error.is_cancelled()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_resumes_after_pause() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        script.send(ProgressPayload::downloading("10%", "", "")).unwrap();
        assert_eq!(percent_of(&next(&mut rx).await), 10.0);

        assert!(ctl.pause());
        script.send(ProgressPayload::downloading("20%", "", "")).unwrap();
        assert!(nothing_within(&mut rx, 80).await);

        assert!(ctl.resume());
        assert_eq!(percent_of(&next(&mut rx).await), 20.0);
        script.send(ProgressPayload::downloading("30%", "", "")).unwrap();
        assert_eq!(percent_of(&next(&mut rx).await), 30.0);

        drop(script);
        assert!(matches!(next(&mut rx).await, TaskEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn unparseable_percent_reports_zero() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        script.send(ProgressPayload::downloading("??%", "2MiB/s", "00:10")).unwrap();
        match next(&mut rx).await {
            TaskEvent::Progress(u) => {
                assert_eq!(u.percent, 0.0);
                assert_eq!(u.speed, "2MiB/s");
                assert_eq!(u.eta, "00:10");
            }
            other => panic!("unexpected {other:?}"),
        }
        drop(script);
        assert!(matches!(next(&mut rx).await, TaskEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn non_downloading_ticks_are_not_forwarded() {
        let (ex, script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        script
            .send(ProgressPayload {
                status: ProgressStatus::Finished,
                percent: Some("100%".into()),
                speed: None,
                eta: None,
            })
            .unwrap();
        drop(script);
        assert!(matches!(next(&mut rx).await, TaskEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn extractor_error_is_reported_as_failed() {
        let (ex, script) =
            ScriptedExtractor::new(Err(TaskError::failed("ERROR: Unsupported URL: https://example/video")));
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);

        ctl.start(audio_request()).unwrap();
        drop(script);
        match next(&mut rx).await {
            TaskEvent::Failed { error } => {
                assert_eq!(error.kind, TaskErrorKind::Failed);
                assert!(error.message.contains("Unsupported URL"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ctl.state(), TaskState::Idle);
    }

    struct PanickingExtractor;

    #[async_trait]
    impl Extractor for PanickingExtractor {
        async fn extract(
            &self,
            _request: &DownloadRequest,
            _hook: ProgressHook,
        ) -> Result<ExtractionOutcome, TaskError> {
            panic!("extractor blew up")
        }
    }

    #[tokio::test]
    async fn panicking_extractor_fails_and_frees_slot() {
        let (emitter, mut rx) = channel_emitter();
        let ctl = TaskController::new(Arc::new(PanickingExtractor), emitter);

        ctl.start(audio_request()).unwrap();
        match next(&mut rx).await {
            TaskEvent::Failed { error } => {
                assert_eq!(error.kind, TaskErrorKind::Failed);
                assert!(error.message.contains("aborted"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!ctl.is_busy());
        assert!(ctl.start(audio_request()).is_ok());
    }

    #[tokio::test]
    async fn controls_without_task_are_noops() {
        let (ex, _script) = ScriptedExtractor::new(Ok(song()));
        let (emitter, _rx) = channel_emitter();
        let ctl = TaskController::new(ex, emitter);
        assert!(!ctl.pause());
        assert!(!ctl.resume());
        assert!(!ctl.cancel());
        assert_eq!(ctl.state(), TaskState::Idle);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let ev = TaskEvent::Failed { error: TaskError::cancelled() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["error"]["kind"], "cancelled");

        let ev = TaskEvent::Progress(ProgressUpdate {
            percent: 12.5,
            speed: "1MiB/s".into(),
            eta: "00:05".into(),
        });
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 12.5);
    }
}
