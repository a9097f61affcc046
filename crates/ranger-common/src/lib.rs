#![doc = "Common types shared across the echo-ranger workspace."]

pub mod config;
pub mod error;
pub mod measurement;
pub mod metrics;
pub mod state;
pub mod time;

pub use config::*;
pub use error::*;
pub use measurement::*;
pub use metrics::*;
pub use state::*;
pub use time::*;
