//! Shared types and utilities for the corpchat server and client.

pub mod error;
pub mod models;
pub mod protocol;
pub mod requests;

pub use error::*;
pub use models::*;
pub use protocol::*;
pub use requests::{GateError, RequestBook};
