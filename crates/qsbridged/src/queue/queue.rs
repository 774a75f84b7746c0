//! Serialized dispatch of cloud API calls.
//!
//! The QwikSwitch cloud API is effectively a single-connection, rate-limited
//! resource. Every outgoing call goes through one `CommandQueue`, which
//! enforces:
//! - priority: device commands dispatch before status polls,
//! - debouncing: rapid repeat commands for one device collapse into the
//!   most recent level, and concurrent polls share a single API call,
//! - throttling: a fixed pause between consecutive calls,
//! - no retries: a failed call is logged and dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::command::Command;
use super::command::CommandKey;
use super::command::CommandKind;
use super::command::PollResult;
use super::command::PollWaiter;
use crate::api::ApiError;
use crate::api::DeviceStatus;
use crate::api::QsApiClient;

/// Maximum device level accepted by the cloud API.
const MAX_LEVEL: u8 = 100;

/// Errors surfaced to callers awaiting a poll.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The queue was stopped before the command ran.
    #[error("command queue stopped")]
    Stopped,

    /// The blocking execution task failed (panicked or was torn down).
    #[error("command execution task failed")]
    TaskFailed,
}

/// Receiving halves of the ready channels, handed to the dispatch loop.
struct Receivers {
    device_rx: mpsc::UnboundedReceiver<Arc<Command>>,
    poll_rx: mpsc::UnboundedReceiver<Arc<Command>>,
}

/// State shared between enqueuers and the dispatch loop.
struct Shared {
    /// Pending commands by debounce key. An entry is removed only after the
    /// command executed (or its channel send failed).
    pending: Mutex<HashMap<CommandKey, Arc<Command>>>,

    /// Ready channels, one per priority class. FIFO within a class; the
    /// dispatch loop drains the device channel first.
    device_tx: mpsc::UnboundedSender<Arc<Command>>,
    poll_tx: mpsc::UnboundedSender<Arc<Command>>,

    /// Pause between consecutive API calls.
    command_delay: Duration,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<CommandKey, Arc<Command>>> {
        // A poisoned lock means a panic elsewhere while holding it; the map
        // itself is still usable.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a command from the pending index, but only if the indexed
    /// entry is this exact command. A replacement enqueued for the same key
    /// after dispatch must not be clobbered.
    fn clear_pending(&self, cmd: &Arc<Command>) {
        let key = cmd.key();
        let mut pending = self.pending();
        if pending
            .get(&key)
            .is_some_and(|indexed| Arc::ptr_eq(indexed, cmd))
        {
            pending.remove(&key);
        }
    }
}

/// A prioritized, debounced, rate-limited dispatcher for cloud API calls.
///
/// Many tasks enqueue; one background loop executes, strictly one command
/// at a time. `enqueue_set_device` is fire-and-forget; `enqueue_poll`
/// returns a future that resolves with the status list or the poll error.
///
/// After `stop()` the loop never restarts. Later enqueues are rejected:
/// device commands are dropped with a debug log, polls resolve promptly
/// with `QueueError::Stopped`, as do polls still queued when the loop dies.
pub struct CommandQueue {
    shared: Arc<Shared>,
    receivers: Mutex<Option<Receivers>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    pub fn new(command_delay: Duration) -> Self {
        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                device_tx,
                poll_tx,
                command_delay,
            }),
            receivers: Mutex::new(Some(Receivers { device_rx, poll_rx })),
            task: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop. From this point on the client belongs to
    /// the queue; nothing else should call it directly.
    pub fn start(&self, client: Arc<dyn QsApiClient>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            warn!("command queue already started");
            return;
        }

        let receivers = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(receivers) = receivers else {
            warn!("command queue cannot be restarted after stop");
            return;
        };

        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(dispatch_loop(shared, client, receivers)));
    }

    /// Cancel the dispatch loop. Commands still queued are abandoned;
    /// their poll futures resolve with `QueueError::Stopped`.
    pub fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Enqueue a device command, or update the level of one already
    /// pending for this device (last write wins). Returns once enqueued,
    /// not once executed; failures are only observable through logs and
    /// the next poll.
    ///
    /// Levels above 100 are clamped; the API treats anything above 100 as
    /// full-on, so the clamp just keeps our own bookkeeping honest.
    pub fn enqueue_set_device(&self, device_id: &str, level: u8) {
        let level = if level > MAX_LEVEL {
            warn!(
                "clamping out-of-range level {} for {} to {}",
                level, device_id, MAX_LEVEL
            );
            MAX_LEVEL
        } else {
            level
        };

        let key = (CommandKind::SetDevice, Some(device_id.to_string()));
        let cmd = {
            let mut pending = self.shared.pending();
            if let Some(existing) = pending.get(&key) {
                if let Command::SetDevice {
                    level: pending_level,
                    ..
                } = &**existing
                {
                    pending_level.store(level, Ordering::Relaxed);
                    debug!("debounced device command for {} to level {}", device_id, level);
                    return;
                }
            }

            let cmd = Arc::new(Command::set_device(device_id.to_string(), level));
            pending.insert(key.clone(), Arc::clone(&cmd));
            cmd
        };

        if self.shared.device_tx.send(cmd).is_err() {
            debug!("queue stopped, dropping device command for {}", device_id);
            self.shared.pending().remove(&key);
        }
    }

    /// Enqueue a status poll, or join the one already pending. Every
    /// joined caller resolves with a clone of the same result, produced by
    /// a single API call.
    ///
    /// The command is registered before this returns; the future only
    /// waits for the outcome.
    pub fn enqueue_poll(&self) -> impl Future<Output = Result<Vec<DeviceStatus>, QueueError>> {
        let (tx, rx) = oneshot::channel();
        self.register_poll_waiter(tx);

        async move {
            match rx.await {
                Ok(result) => result,
                // Sender dropped without settling: the queue went away.
                Err(_) => Err(QueueError::Stopped),
            }
        }
    }

    fn register_poll_waiter(&self, waiter: PollWaiter) {
        let key = (CommandKind::Poll, None);
        let cmd = {
            let mut pending = self.shared.pending();
            if let Some(existing) = pending.get(&key) {
                if let Command::Poll { waiters } = &**existing {
                    waiters
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(waiter);
                    debug!("joined pending poll");
                    return;
                }
            }

            let cmd = Arc::new(Command::poll(waiter));
            pending.insert(key.clone(), Arc::clone(&cmd));
            cmd
        };

        if self.shared.poll_tx.send(cmd).is_err() {
            debug!("queue stopped, rejecting poll");
            // Dropping the command drops its waiters, which settles the
            // callers with `Stopped`.
            self.shared.pending().remove(&key);
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single long-running task that executes queued commands.
///
/// Cancellation (via `CommandQueue::stop`) propagates out of any of the
/// await points below; it is never caught or logged as an error.
async fn dispatch_loop(
    shared: Arc<Shared>,
    client: Arc<dyn QsApiClient>,
    mut receivers: Receivers,
) {
    loop {
        // Device commands strictly before polls; FIFO within each class.
        let cmd = tokio::select! {
            biased;
            Some(cmd) = receivers.device_rx.recv() => cmd,
            Some(cmd) = receivers.poll_rx.recv() => cmd,
            else => break,
        };

        handle_command(&shared, &client, cmd).await;

        // Throttle whatever the outcome; the cloud API rate-limits per
        // account, not per successful call.
        tokio::time::sleep(shared.command_delay).await;
    }

    debug!("command queue dispatch loop exiting");
}

async fn handle_command(shared: &Shared, client: &Arc<dyn QsApiClient>, cmd: Arc<Command>) {
    match &*cmd {
        Command::SetDevice { device_id, level } => {
            // Read the level now so debounced updates up to this point win.
            let level = level.load(Ordering::Relaxed);
            let result = {
                let client = Arc::clone(client);
                let device_id = device_id.clone();
                run_blocking(move || client.control_device(&device_id, level)).await
            };

            shared.clear_pending(&cmd);

            match result {
                Ok(()) => debug!("set {} to level {}", device_id, level),
                // Fire and forget: no retry, no caller to notify. The next
                // poll reveals the true device state.
                Err(e) => error!("device command for {} failed: {}", device_id, e),
            }
        }
        Command::Poll { .. } => {
            let result = {
                let client = Arc::clone(client);
                run_blocking(move || client.get_all_device_status()).await
            };

            // Clear the index before settling so a caller arriving between
            // the two steps starts a fresh poll instead of joining a
            // settled one.
            shared.clear_pending(&cmd);

            if let Err(e) = &result {
                warn!("status poll failed: {}", e);
            }
            settle_poll(&cmd, result);
        }
    }
}

/// Run a blocking client call without stalling the runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, QueueError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(QueueError::Api),
        Err(e) => {
            if e.is_panic() {
                error!("API call panicked: {}", e);
            }
            Err(QueueError::TaskFailed)
        }
    }
}

fn settle_poll(cmd: &Command, result: PollResult) {
    if let Command::Poll { waiters } = cmd {
        let drained: Vec<PollWaiter> = waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for waiter in drained {
            // A caller that gave up waiting is fine to ignore.
            let _ = waiter.send(result.clone());
        }
    }
}
