//! HTTP adapter for the hosted pharmacy document API.

mod client;
mod error;
mod types;

pub use client::RemoteApiClient;
pub use error::{RemoteError, Result};
pub use types::*;
