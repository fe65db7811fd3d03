//! Transfer tasks: one remote operation with its own lifecycle
//!
//! Every state change of a task goes through one `watch` sender and is
//! validated inside `send_if_modified`, so transitions of one task are
//! strictly ordered. The worker runs on its own tokio task and consults
//! [`TaskControl::checkpoint`] before each read or write; suspension parks
//! it there and cancellation stops it there.

use super::progress::{PartialPolicy, ResumePoint, TransferDirection, TransferProgress};
use super::state::TransferTaskState;
use super::worker;
use crate::client::TreeHandle;
use crate::error::{Error, ErrorCode, SmbError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The operation a task performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRequest {
    /// Single file to a local path. With `resume`, an existing local file's
    /// length is taken as the starting offset.
    Download {
        remote: String,
        local: PathBuf,
        resume: bool,
    },
    /// Remote directory tree to a local directory
    DownloadDirectory { remote: String, local: PathBuf },
    /// Local file to a remote path, starting at `offset`
    Upload {
        local: PathBuf,
        remote: String,
        offset: u64,
    },
    /// File, or directory with its contents
    Delete { remote: String },
    CreateDirectory { remote: String },
    Move { from: String, to: String },
}

impl TransferRequest {
    pub fn download(remote: impl Into<String>, local: impl Into<PathBuf>) -> Self {
        Self::Download {
            remote: remote.into(),
            local: local.into(),
            resume: false,
        }
    }

    pub fn upload(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self::Upload {
            local: local.into(),
            remote: remote.into(),
            offset: 0,
        }
    }

    /// Continue a transfer recorded by [`TransferTask::resume_point`]
    pub fn from_resume_point(point: &ResumePoint) -> Self {
        match point.direction {
            TransferDirection::Download => Self::Download {
                remote: point.remote_path.clone(),
                local: point.local_path.clone(),
                resume: true,
            },
            TransferDirection::Upload => Self::Upload {
                local: point.local_path.clone(),
                remote: point.remote_path.clone(),
                offset: point.offset,
            },
        }
    }

    /// Code reported for failures with no more precise meaning
    pub(crate) fn failure_code(&self) -> ErrorCode {
        match self {
            Self::Download { .. } | Self::DownloadDirectory { .. } => ErrorCode::Unknown,
            Self::Upload { .. } => ErrorCode::FailToUpload,
            Self::Delete { .. } => ErrorCode::UnableToDeleteItem,
            Self::CreateDirectory { .. } => ErrorCode::UnableToCreateDirectory,
            Self::Move { .. } => ErrorCode::UnableToMoveFile,
        }
    }
}

/// How a task ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Cancelled,
}

/// Why a worker stopped early
#[derive(Debug)]
pub(crate) enum Stop {
    Cancelled,
    Failed(SmbError),
}

impl From<SmbError> for Stop {
    fn from(e: SmbError) -> Self {
        Stop::Failed(e)
    }
}

/// Destination a worker has started writing
#[derive(Debug, Clone)]
pub(crate) enum PartialTarget {
    Local(PathBuf),
    Remote(String),
}

type Finished = Option<std::result::Result<TransferOutcome, SmbError>>;

/// State shared between a task handle and its worker
pub(crate) struct TaskControl {
    state: watch::Sender<TransferTaskState>,
    progress: watch::Sender<TransferProgress>,
    finished: watch::Sender<Finished>,
    cancel: CancellationToken,
    partial: Mutex<Option<PartialTarget>>,
    max_retries: u32,
}

impl TaskControl {
    fn new(max_retries: u32) -> Self {
        Self {
            state: watch::channel(TransferTaskState::Ready).0,
            progress: watch::channel(TransferProgress::default()).0,
            finished: watch::channel(None).0,
            cancel: CancellationToken::new(),
            partial: Mutex::new(None),
            max_retries,
        }
    }

    /// A running control, for exercising workers directly
    #[cfg(test)]
    pub(crate) fn for_tests(max_retries: u32) -> Self {
        let control = Self::new(max_retries);
        control.state.send_replace(TransferTaskState::Running);
        control
    }

    pub(crate) fn state(&self) -> TransferTaskState {
        *self.state.borrow()
    }

    /// Apply `next` if the lifecycle allows it, returning the prior state
    fn transition(&self, next: TransferTaskState) -> std::result::Result<TransferTaskState, TransferTaskState> {
        let mut outcome = Err(next);
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                outcome = Ok(*state);
                debug!("Transfer {} -> {}", state, next);
                *state = next;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });
        outcome
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// I/O boundary: returns at once while running, parks while suspended
    /// and reports cancellation.
    pub(crate) async fn checkpoint(&self) -> std::result::Result<(), Stop> {
        let mut state = self.state.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
            let current = *state.borrow_and_update();
            match current {
                TransferTaskState::Running => return Ok(()),
                TransferTaskState::Suspended => {}
                _ => return Err(Stop::Cancelled),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(Stop::Cancelled);
                    }
                }
            }
        }
    }

    pub(crate) fn set_progress(&self, bytes_transferred: u64, total_bytes: Option<u64>) {
        self.progress
            .send_replace(TransferProgress::new(bytes_transferred, total_bytes));
    }

    pub(crate) fn add_progress(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.progress.send_modify(|progress| {
            progress.bytes_transferred += bytes;
        });
    }

    pub(crate) fn progress(&self) -> TransferProgress {
        *self.progress.borrow()
    }

    pub(crate) fn register_partial(&self, target: PartialTarget) {
        *self.partial.lock().unwrap_or_else(PoisonError::into_inner) = Some(target);
    }

    pub(crate) fn clear_partial(&self) {
        self.partial.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn take_partial(&self) -> Option<PartialTarget> {
        self.partial.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn finish(&self, result: std::result::Result<TransferOutcome, SmbError>) {
        self.finished.send_replace(Some(result));
    }
}

/// A file or directory operation on a share
pub struct TransferTask {
    tree: TreeHandle,
    request: TransferRequest,
    policy: PartialPolicy,
    control: Arc<TaskControl>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferTask {
    pub fn new(tree: TreeHandle, request: TransferRequest) -> Self {
        let max_retries = tree.session().config().max_retries;
        Self {
            tree,
            request,
            policy: PartialPolicy::default(),
            control: Arc::new(TaskControl::new(max_retries)),
            worker: Mutex::new(None),
        }
    }

    /// Choose what happens to a partial destination on cancel or failure
    pub fn with_partial_policy(mut self, policy: PartialPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn state(&self) -> TransferTaskState {
        self.control.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TransferTaskState> {
        self.control.state.subscribe()
    }

    pub fn progress(&self) -> TransferProgress {
        self.control.progress()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<TransferProgress> {
        self.control.progress.subscribe()
    }

    /// `Ready → Running`: spawns the worker on the current tokio runtime
    pub fn start(&self) -> std::result::Result<(), SmbError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::InvalidState(format!("no tokio runtime: {}", e)).into_smb_error(ErrorCode::Unknown)
        })?;
        self.control
            .transition(TransferTaskState::Running)
            .map_err(|current| invalid("start", current))?;

        self.control.set_progress(0, None);
        info!("Starting {:?}", self.request);
        let handle = runtime.spawn(run(
            self.control.clone(),
            self.tree.clone(),
            self.request.clone(),
            self.policy,
        ));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// `Running → Suspended`; the worker parks at its next I/O boundary
    pub fn suspend(&self) -> std::result::Result<(), SmbError> {
        match self.control.transition(TransferTaskState::Suspended) {
            Ok(_) => Ok(()),
            Err(current) => Err(invalid("suspend", current)),
        }
    }

    /// `Suspended → Running` from the recorded offset
    pub fn resume(&self) -> std::result::Result<(), SmbError> {
        match self.control.state() {
            TransferTaskState::Suspended => self
                .control
                .transition(TransferTaskState::Running)
                .map(|_| ())
                .map_err(|current| invalid("resume", current)),
            current => Err(invalid("resume", current)),
        }
    }

    /// Any non-terminal state → `Cancelled`. The worker stops at its next
    /// I/O boundary and writes nothing after that.
    pub fn cancel(&self) -> std::result::Result<(), SmbError> {
        let previous = self
            .control
            .transition(TransferTaskState::Cancelled)
            .map_err(|current| invalid("cancel", current))?;
        self.control.cancel.cancel();
        if previous == TransferTaskState::Ready {
            self.control.finish(Ok(TransferOutcome::Cancelled));
        }
        Ok(())
    }

    /// Wait for the task to end. Failures surface as `Err`; the task state
    /// is then `Cancelled`.
    pub async fn wait(&self) -> std::result::Result<TransferOutcome, SmbError> {
        if self.control.state() == TransferTaskState::Ready {
            return Err(SmbError::with_detail(
                ErrorCode::Unknown,
                "task has not been started",
            ));
        }
        let mut finished = self.control.finished.subscribe();
        let result = finished
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SmbError::with_detail(ErrorCode::Unknown, "transfer worker vanished"))?;
        match &*result {
            Some(result) => result.clone(),
            None => Err(SmbError::new(ErrorCode::Unknown)),
        }
    }

    /// Position to continue an interrupted single-file transfer from
    pub fn resume_point(&self) -> Option<ResumePoint> {
        let offset = self.control.progress().bytes_transferred;
        match &self.request {
            TransferRequest::Download { remote, local, .. } => Some(ResumePoint {
                direction: TransferDirection::Download,
                remote_path: remote.clone(),
                local_path: local.clone(),
                offset,
            }),
            TransferRequest::Upload { local, remote, .. } => Some(ResumePoint {
                direction: TransferDirection::Upload,
                remote_path: remote.clone(),
                local_path: local.clone(),
                offset,
            }),
            _ => None,
        }
    }
}

impl Drop for TransferTask {
    fn drop(&mut self) {
        // An abandoned task stops at its next I/O boundary
        if !self.control.state().is_terminal() {
            let _ = self.control.transition(TransferTaskState::Cancelled);
            self.control.cancel.cancel();
        }
    }
}

fn invalid(operation: &str, current: TransferTaskState) -> SmbError {
    Error::InvalidStateTransition(format!("cannot {} a {} task", operation, current))
        .into_smb_error(ErrorCode::Unknown)
}

async fn run(control: Arc<TaskControl>, tree: TreeHandle, request: TransferRequest, policy: PartialPolicy) {
    let result = worker::execute(&control, &tree, &request).await;

    let outcome = match result {
        Ok(bytes) => match settle(&control).await {
            Ok(()) => {
                control.clear_partial();
                info!("Completed {:?} ({} bytes)", request, bytes);
                Ok(TransferOutcome::Completed { bytes })
            }
            Err(_) => {
                info!("Cancelled {:?} after its last transfer", request);
                let _ = control.transition(TransferTaskState::Cancelled);
                discard_partial(&control, &tree, policy).await;
                Ok(TransferOutcome::Cancelled)
            }
        },
        Err(Stop::Cancelled) => {
            info!("Cancelled {:?}", request);
            let _ = control.transition(TransferTaskState::Cancelled);
            discard_partial(&control, &tree, policy).await;
            Ok(TransferOutcome::Cancelled)
        }
        Err(Stop::Failed(e)) => {
            warn!("{:?} failed: {} ({:?})", request, e, e.detail());
            let _ = control.transition(TransferTaskState::Cancelled);
            discard_partial(&control, &tree, policy).await;
            Err(e)
        }
    };
    control.finish(outcome);
}

/// Move a finished worker to `Completed`. A task suspended after its last
/// I/O boundary parks here until it is resumed or cancelled.
async fn settle(control: &TaskControl) -> std::result::Result<(), Stop> {
    loop {
        control.checkpoint().await?;
        if control.transition(TransferTaskState::Completed).is_ok() {
            return Ok(());
        }
    }
}

async fn discard_partial(control: &TaskControl, tree: &TreeHandle, policy: PartialPolicy) {
    let target = control.take_partial();
    if policy != PartialPolicy::Delete {
        return;
    }
    match target {
        Some(PartialTarget::Local(path)) => remove_local(&path).await,
        Some(PartialTarget::Remote(path)) => {
            if let Err(e) = tree.delete(&path).await {
                debug!("Could not remove partial upload {}: {}", path, e);
            }
        }
        None => {}
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Could not remove partial file {}: {}", path.display(), e);
    }
}

/// Task constructors bound to a share
impl TreeHandle {
    pub fn download_task(&self, remote: &str, local: impl Into<PathBuf>) -> TransferTask {
        TransferTask::new(self.clone(), TransferRequest::download(remote, local))
    }

    pub fn download_directory_task(&self, remote: &str, local: impl Into<PathBuf>) -> TransferTask {
        TransferTask::new(
            self.clone(),
            TransferRequest::DownloadDirectory {
                remote: remote.to_string(),
                local: local.into(),
            },
        )
    }

    pub fn upload_task(&self, local: impl Into<PathBuf>, remote: &str) -> TransferTask {
        TransferTask::new(self.clone(), TransferRequest::upload(local, remote))
    }

    pub fn delete_task(&self, remote: &str) -> TransferTask {
        TransferTask::new(
            self.clone(),
            TransferRequest::Delete {
                remote: remote.to_string(),
            },
        )
    }

    pub fn create_directory_task(&self, remote: &str) -> TransferTask {
        TransferTask::new(
            self.clone(),
            TransferRequest::CreateDirectory {
                remote: remote.to_string(),
            },
        )
    }

    pub fn move_task(&self, from: &str, to: &str) -> TransferTask {
        TransferTask::new(
            self.clone(),
            TransferRequest::Move {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }
}
