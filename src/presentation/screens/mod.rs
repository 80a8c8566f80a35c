pub mod control;
pub mod devices;
pub mod settings;
