pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod socks;
pub mod wire;

pub use error::{Error, Result};
