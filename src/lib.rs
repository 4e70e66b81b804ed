pub mod api;
pub mod coordinator;
pub mod discovery;
pub mod model;
pub mod retry;
pub mod seen_keys;
pub mod sensor;
pub mod settings;
pub mod winet;

#[cfg(test)]
mod testing;

pub use api::Error;
pub use winet::WiNet;
