pub mod attendance;
pub mod classes;
pub mod core;
pub mod schedule;
pub mod setup;
pub mod subject_attendance;
