pub mod lifecycle;
pub mod scheduler;

pub use scheduler::{LifecycleScheduler, SCHEDULER_ACTOR};
