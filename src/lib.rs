// src/lib.rs
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod flatten;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod push;
pub mod reconcile;
pub mod reshape;
pub mod store;

pub use error::{IngestError, Result};
pub use frame::Frame;
