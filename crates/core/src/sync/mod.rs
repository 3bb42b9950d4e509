//! Outbox replay, optimistic writes, reconciliation and backup.

mod backup;
mod driver;
mod policy;
mod reconcile;
mod writer;

pub use backup::*;
pub use driver::*;
pub use policy::*;
pub use reconcile::*;
pub use writer::*;
