use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use super::state::Snapshot;
use crate::queue::CommandQueue;
use crate::queue::QueueError;

/// Level sent for a plain "turn on" with no explicit brightness.
const FULL_LEVEL: u8 = 100;

/// Polls device state through the command queue on a fixed interval and
/// maintains the shared device snapshot.
///
/// Readers load the snapshot `Arc`; the coordinator is the only writer, so
/// updates are plain clone-and-store. Device commands issued through the
/// coordinator mark the device optimistic immediately, before the queue
/// has even dispatched the command.
pub struct PollCoordinator {
    queue: Arc<CommandQueue>,
    snapshot: ArcSwap<Snapshot>,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollCoordinator {
    pub fn new(queue: Arc<CommandQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            snapshot: ArcSwap::new(Arc::default()),
            poll_interval,
            task: Mutex::new(None),
        }
    }

    /// Spawn the periodic poll task. The first poll happens one interval
    /// from now; call `refresh` first if a snapshot is needed up front.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            warn!("poll coordinator already started");
            return;
        }

        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.poll_interval).await;
                if let Err(e) = this.refresh().await {
                    warn!("periodic poll failed, keeping previous snapshot: {}", e);
                }
            }
        }));
    }

    /// Cancel the periodic poll task.
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

    /// Poll once through the queue and fold the result into the snapshot.
    ///
    /// On failure the previous snapshot stays in place; entities simply go
    /// stale until a later poll succeeds.
    pub async fn refresh(&self) -> Result<(), QueueError> {
        let statuses = self.queue.enqueue_poll().await?;
        let next = self.snapshot.load().apply_poll(&statuses);
        self.snapshot.store(Arc::new(next));
        debug!("device snapshot refreshed, {} devices reported", statuses.len());
        Ok(())
    }

    /// Current snapshot. Cloning the `Arc` is essentially free.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Queue a device command and record the level optimistically so local
    /// views reflect it before the next poll.
    pub fn set_device(&self, device_id: &str, level: u8) {
        self.queue.enqueue_set_device(device_id, level);

        match self.snapshot.load().with_optimistic(device_id, level) {
            Some(next) => self.snapshot.store(Arc::new(next)),
            // Commands for devices we have never polled still go out; there
            // is just no local state to update yet.
            None => debug!("no snapshot entry for {}, skipping optimistic update", device_id),
        }
    }

    pub fn turn_on(&self, device_id: &str) {
        self.set_device(device_id, FULL_LEVEL);
    }

    pub fn turn_off(&self, device_id: &str) {
        self.set_device(device_id, 0);
    }
}

impl Drop for PollCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockClient;
    use crate::api::ApiError;
    use crate::api::DeviceClass;
    use crate::api::DeviceStatus;
    use crate::engine::state::DeviceValue;
    use crate::engine::state::LightState;

    fn status(device_id: &str, device_class: DeviceClass, value: u8) -> DeviceStatus {
        DeviceStatus {
            device_id: device_id.to_string(),
            device_class,
            value,
        }
    }

    fn coordinator() -> (Arc<PollCoordinator>, Arc<MockClient>) {
        let queue = Arc::new(CommandQueue::new(Duration::ZERO));
        let client = MockClient::new();
        queue.start(client.clone());
        let coordinator = Arc::new(PollCoordinator::new(queue, Duration::from_secs(30)));
        (coordinator, client)
    }

    #[tokio::test]
    async fn refresh_builds_device_views() {
        let (coordinator, client) = coordinator();
        client.push_status_result(Ok(vec![
            status("@dim1", DeviceClass::Dimmer, 40),
            status("@rel1", DeviceClass::Relay, 100),
        ]));

        coordinator.refresh().await.unwrap();

        let snapshot = coordinator.snapshot();
        assert_eq!(
            snapshot.lights().get("@dim1"),
            Some(&LightState {
                on: true,
                brightness: Some(102)
            })
        );
        assert!(snapshot.switches().get("@rel1").unwrap().on);
    }

    #[tokio::test]
    async fn set_device_is_optimistic_until_overridden() {
        let (coordinator, client) = coordinator();
        client.push_status_result(Ok(vec![status("@dim1", DeviceClass::Dimmer, 40)]));
        coordinator.refresh().await.unwrap();

        coordinator.set_device("@dim1", 90);
        assert_eq!(
            coordinator.snapshot().devices.get("@dim1").map(|s| s.value),
            Some(DeviceValue::Optimistic(90))
        );

        // The device never actually moved; the next poll wins.
        client.push_status_result(Ok(vec![status("@dim1", DeviceClass::Dimmer, 40)]));
        coordinator.refresh().await.unwrap();
        assert_eq!(
            coordinator.snapshot().devices.get("@dim1").map(|s| s.value),
            Some(DeviceValue::Confirmed(40))
        );
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_snapshot() {
        let (coordinator, client) = coordinator();
        client.push_status_result(Ok(vec![status("@rel1", DeviceClass::Relay, 100)]));
        coordinator.refresh().await.unwrap();

        client.push_status_result(Err(ApiError::Request("connection reset".to_string())));
        let err = coordinator.refresh().await.unwrap_err();
        assert!(matches!(err, QueueError::Api(ApiError::Request(_))));

        assert!(coordinator.snapshot().switches().get("@rel1").unwrap().on);
    }

    #[tokio::test]
    async fn turn_on_and_off_map_to_full_and_zero() {
        let (coordinator, client) = coordinator();
        client.push_status_result(Ok(vec![status("@rel1", DeviceClass::Relay, 0)]));
        coordinator.refresh().await.unwrap();

        coordinator.turn_on("@rel1");
        coordinator.turn_off("@rel1");

        // Debounced: one pending command, last write wins.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let calls = client.control_calls();
        assert_eq!(calls.last(), Some(&("@rel1".to_string(), 0)));
    }
}
