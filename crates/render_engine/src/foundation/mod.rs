//! Foundation utilities: logging and timing

pub mod logging;
pub mod time;

pub use time::Timer;
