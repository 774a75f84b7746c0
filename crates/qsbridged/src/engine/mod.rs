mod coordinator;
pub mod state;

pub use coordinator::PollCoordinator;
pub use state::DeviceState;
pub use state::DeviceValue;
pub use state::LightState;
pub use state::Snapshot;
pub use state::SwitchState;
pub use state::reconcile;
