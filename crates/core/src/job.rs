use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::{Command, CommandKind};
use crate::device::DeviceError;

/// Identity of one job, unique for the life of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    CancelRequested,
    Terminated,
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// The animation ran to its natural end
    Completed,
    /// Cancellation was observed and the strip was cleared
    Cancelled,
    /// The device failed; the job stopped driving it
    Failed(DeviceError),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => f.write_str("completed"),
            JobOutcome::Cancelled => f.write_str("cancelled"),
            JobOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Create a linked cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Supervisor side of a job's cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Job side of the cancellation flag.
///
/// Dropping the [`CancelHandle`] counts as a cancellation request.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// One in-flight or finished animation. Only the supervisor holds these.
pub struct Job {
    pub(crate) id: JobId,
    pub(crate) command: Command,
    pub(crate) cancel: CancelHandle,
    pub(crate) handle: JoinHandle<JobOutcome>,
}

impl Job {
    pub fn state(&self) -> JobState {
        if self.handle.is_finished() {
            JobState::Terminated
        } else if self.cancel.is_requested() {
            JobState::CancelRequested
        } else {
            JobState::Running
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            kind: self.command.kind,
            state: self.state(),
        }
    }
}

/// Read-only view of the supervisor's current job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
    pub id: JobId,
    pub kind: CommandKind,
    pub state: JobState,
}
