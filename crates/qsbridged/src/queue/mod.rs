mod command;
mod queue;

pub use queue::CommandQueue;
pub use queue::QueueError;
