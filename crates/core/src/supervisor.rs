use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::animation::{self, Canvas};
use crate::command::Command;
use crate::device::{self, PixelDevice, SharedDevice};
use crate::job::{cancellation, Job, JobId, JobOutcome, JobState, JobStatus};

/// How long a supervisor-side clear waits for the device lock
const DEVICE_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Upper bound on waiting for a cancelled job. `None` waits forever.
    pub cancel_timeout: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            cancel_timeout: Some(Duration::from_secs(2)),
        }
    }
}

/// Returned by [`JobSupervisor::submit`]. The new job does not commit its
/// first frame until this is released or dropped.
#[must_use = "the job starts drawing when the gate is released or dropped"]
pub struct StartGate {
    id: JobId,
    tx: oneshot::Sender<()>,
}

impl StartGate {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

/// Flips to true once an aborted job has let go of the strip and it was cleared
type Settling = watch::Receiver<bool>;

fn is_settled(settling: &Settling) -> bool {
    *settling.borrow() || settling.has_changed().is_err()
}

#[derive(Default)]
struct Slot {
    job: Option<Job>,
    settling: Option<Settling>,
}

pub struct JobSupervisor {
    device: SharedDevice,
    num_pixels: usize,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    settings: SupervisorSettings,
}

impl JobSupervisor {
    pub fn new(device: Box<dyn PixelDevice>, settings: SupervisorSettings) -> Self {
        Self::with_shared(device::shared(device), settings)
    }

    pub fn with_shared(device: SharedDevice, settings: SupervisorSettings) -> Self {
        let num_pixels = device.lock().num_pixels();
        Self {
            device,
            num_pixels,
            slot: Mutex::new(Slot::default()),
            next_id: AtomicU64::new(1),
            settings,
        }
    }

    /// Replace whatever is playing with `command`.
    ///
    /// Returns once the previous job has stopped driving the strip, or has
    /// been aborted after `cancel_timeout`, and the new job has been spawned.
    /// Behind an aborted job the new one draws nothing until the strip has
    /// been released and cleared.
    pub async fn submit(&self, command: Command) -> StartGate {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.job.take() {
            if let Some(settling) = self.retire(previous).await {
                slot.settling = Some(settling);
            }
        }
        if slot.settling.as_ref().is_some_and(is_settled) {
            slot.settling = None;
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (cancel, signal) = cancellation();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let mut canvas = Canvas::with_len(self.device.clone(), signal.clone(), self.num_pixels);
        let settling = slot.settling.clone();
        let task_command = command.clone();

        let handle = tokio::spawn(async move {
            let mut signal = signal;
            let released = tokio::select! {
                _ = gate_rx => true,
                _ = signal.cancelled() => false,
            };
            if !released {
                log::debug!("{} cancelled before its first frame", id);
                return JobOutcome::Cancelled;
            }

            if let Some(mut settling) = settling {
                log::debug!("{} waiting for the strip to be released", id);
                let settled = tokio::select! {
                    _ = settling.wait_for(|done| *done) => true,
                    _ = signal.cancelled() => false,
                };
                if !settled {
                    log::debug!("{} cancelled before its first frame", id);
                    return JobOutcome::Cancelled;
                }
            }

            log::debug!("{} playing {:?}", id, task_command);
            let outcome = animation::perform(&task_command, &mut canvas).await;
            match &outcome {
                JobOutcome::Failed(e) => {
                    log::error!("{} ({}) stopped on device error: {}", id, task_command.kind, e)
                }
                _ => log::info!("{} ({}) {}", id, task_command.kind, outcome),
            }
            outcome
        });

        log::info!("Started {} ({})", id, command.kind);
        slot.job = Some(Job {
            id,
            command,
            cancel,
            handle,
        });

        StartGate { id, tx: gate_tx }
    }

    /// Stop the current job, if any, without starting another.
    pub async fn cancel(&self) -> Option<JobId> {
        let mut slot = self.slot.lock().await;
        let job = slot.job.take()?;
        let id = job.id;
        if let Some(settling) = self.retire(job).await {
            slot.settling = Some(settling);
        }
        Some(id)
    }

    /// Stop the current job and leave the strip dark.
    pub async fn shutdown(&self) {
        log::info!("Supervisor shutting down");
        self.cancel().await;

        let settling = self.slot.lock().await.settling.take();
        if let Some(mut settling) = settling {
            let limit = self.settings.cancel_timeout.unwrap_or(DEVICE_LOCK_TIMEOUT);
            if tokio::time::timeout(limit, settling.wait_for(|done| *done))
                .await
                .is_err()
            {
                log::error!("Strip is still held by an aborted job");
            }
        }
        clear_strip(self.device.clone()).await;
    }

    /// Status of the live job. A job that has terminated is reaped and the
    /// slot reported free.
    pub async fn current(&self) -> Option<JobStatus> {
        let mut slot = self.slot.lock().await;
        let finished = slot
            .job
            .as_ref()
            .is_some_and(|job| job.state() == JobState::Terminated);
        if finished {
            if let Some(job) = slot.job.take() {
                if let Some(settling) = self.retire(job).await {
                    slot.settling = Some(settling);
                }
            }
        }
        slot.job.as_ref().map(Job::status)
    }

    /// Cancel `job` and wait for it to terminate.
    ///
    /// A job still running after `cancel_timeout` is aborted and left to
    /// finish in the background; the returned receiver reports when it has
    /// let go of the strip and the strip has been cleared.
    async fn retire(&self, job: Job) -> Option<Settling> {
        let Job {
            id,
            command,
            cancel,
            mut handle,
        } = job;

        if !handle.is_finished() {
            log::debug!("Cancelling {} ({})", id, command.kind);
            cancel.cancel();
        }

        let joined = match self.settings.cancel_timeout {
            None => (&mut handle).await,
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    log::warn!(
                        "{} ({}) ignored cancellation for {:?}, aborting it",
                        id,
                        command.kind,
                        limit
                    );
                    handle.abort();
                    return Some(self.settle(id, handle));
                }
            },
        };

        match joined {
            Ok(outcome) => log::debug!("Retired {}: {}", id, outcome),
            Err(e) => {
                log::error!("{} ({}) panicked: {}", id, command.kind, e);
                clear_strip(self.device.clone()).await;
            }
        }
        None
    }

    /// Clear the strip once the aborted job `handle` has really ended.
    fn settle(&self, id: JobId, handle: JoinHandle<JobOutcome>) -> Settling {
        let (done_tx, done_rx) = watch::channel(false);
        let device = self.device.clone();
        tokio::spawn(async move {
            // An abort only lands at an await point; a job stuck in a device
            // call keeps the strip until that call returns
            let _ = handle.await;
            log::info!("{} released the strip", id);
            clear_strip(device).await;
            done_tx.send_replace(true);
        });
        done_rx
    }
}

/// Clear the strip from the supervisor's side, on the blocking pool so a
/// wedged device call cannot stall a runtime worker.
async fn clear_strip(device: SharedDevice) {
    let cleared = tokio::task::spawn_blocking(move || {
        let mut device = device.try_lock_for(DEVICE_LOCK_TIMEOUT)?;
        Some(device::clear(&mut **device))
    })
    .await;

    match cleared {
        Ok(Some(Ok(()))) => {}
        Ok(Some(Err(e))) => log::error!("Failed to clear strip: {}", e),
        Ok(None) => log::error!("Strip is still locked by a stuck job; cannot clear it"),
        Err(e) => log::error!("Strip clear task failed: {}", e),
    }
}
