pub mod attendance;
pub mod classes;
pub mod config;
pub mod core;
pub mod subjects;
pub mod timetable;
pub mod users;
