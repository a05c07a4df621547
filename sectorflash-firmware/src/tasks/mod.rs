//! Async tasks

mod sensors;

pub use sensors::{sensor_task, Sensors};
