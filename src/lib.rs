pub mod commands;
pub mod config;
pub mod devices;
pub mod errors;
pub mod protocol;
pub mod robot;
pub mod sensors;

pub use commands::Command;
pub use robot::Robot;
pub use sensors::SensorFrame;
