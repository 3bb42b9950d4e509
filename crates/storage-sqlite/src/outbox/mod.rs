mod model;
mod repository;

pub use model::{NewPendingOperationDB, PendingOperationDB};
pub use repository::OutboxRepository;
