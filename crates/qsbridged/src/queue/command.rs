use std::sync::atomic::AtomicU8;
use std::sync::Mutex;

use tokio::sync::oneshot;

use super::queue::QueueError;
use crate::api::DeviceStatus;

/// The kind of a queued command, which is also its priority class: device
/// commands always dispatch before polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum CommandKind {
    SetDevice,
    Poll,
}

/// Debounce key: at most one pending command exists per key at any time.
pub(super) type CommandKey = (CommandKind, Option<String>);

pub(super) type PollResult = Result<Vec<DeviceStatus>, QueueError>;

pub(super) type PollWaiter = oneshot::Sender<PollResult>;

/// A unit of work owned by the queue.
///
/// A pending command lives in the pending index and one of the ready
/// channels at the same time. Debounced enqueues mutate it in place: device
/// commands overwrite the target level (last write wins), polls add the new
/// caller to the waiter list so one API call settles everyone.
pub(super) enum Command {
    SetDevice {
        device_id: String,
        /// Target level in 0..=100, read at execution time.
        level: AtomicU8,
    },
    Poll {
        waiters: Mutex<Vec<PollWaiter>>,
    },
}

impl Command {
    pub(super) fn set_device(device_id: String, level: u8) -> Self {
        Self::SetDevice {
            device_id,
            level: AtomicU8::new(level),
        }
    }

    pub(super) fn poll(waiter: PollWaiter) -> Self {
        Self::Poll {
            waiters: Mutex::new(vec![waiter]),
        }
    }

    pub(super) fn key(&self) -> CommandKey {
        match self {
            Self::SetDevice { device_id, .. } => {
                (CommandKind::SetDevice, Some(device_id.clone()))
            }
            Self::Poll { .. } => (CommandKind::Poll, None),
        }
    }
}
