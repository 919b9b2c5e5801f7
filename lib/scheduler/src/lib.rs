//! Cron scheduling for the flowline platform.
//!
//! Parses 5-field cron expressions, evaluates due times, and runs the
//! schedule loop that fires workflows through the dispatcher.

pub mod error;
pub mod runner;
pub mod schedule;

pub use error::ScheduleError;
pub use runner::Scheduler;
pub use schedule::CronSchedule;
