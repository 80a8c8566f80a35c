pub mod command;
pub mod models;
pub mod protocol;
pub mod repeater;
pub mod session;
pub mod settings;
pub mod transport;
pub mod write_queue;
