pub mod api;
pub mod config;
mod engine;
mod queue;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::DeviceState;
pub use engine::DeviceValue;
pub use engine::LightState;
pub use engine::PollCoordinator;
pub use engine::Snapshot;
pub use engine::SwitchState;
pub use engine::reconcile;
pub use queue::CommandQueue;
pub use queue::QueueError;
