//! Background tasks.

pub mod schedule_watcher;
