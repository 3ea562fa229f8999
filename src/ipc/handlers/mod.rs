pub mod attendance;
pub mod core;
pub mod grading;
pub mod hifz;
pub mod notifications;
pub mod roster;
