pub mod accounts;
pub mod config;
pub mod controller;
pub mod entrypoint;
pub mod error;
pub mod handoff;
pub mod reconciler;
pub mod utils;

pub use error::StewardError;
