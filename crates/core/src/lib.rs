pub mod connectivity;
pub mod errors;
pub mod kv;
pub mod outbox;
pub mod remote;
pub mod sync;

pub use errors::Error;
pub use errors::Result;
