//! Single writer thread. Every mutation runs here, one immediate transaction per job,
//! so writes are serialised in submission order.

use diesel::sqlite::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use pharmapos_core::errors::{Error, Result};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(Result<&mut SqliteConnection>) + Send + 'static>;

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Run `job` inside an immediate transaction on the writer thread.
    ///
    /// An `Err` from the job rolls the transaction back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let wrapped: Job = Box::new(move |conn: Result<&mut SqliteConnection>| {
            let outcome = conn.and_then(|conn| {
                conn.immediate_transaction::<T, StorageError, _>(|tx| {
                    job(tx).map_err(StorageError::from)
                })
                .map_err(Error::from)
            });
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(outcome);
        });

        self.tx
            .send(wrapped)
            .map_err(|_| Error::storage_unavailable("Database writer has stopped"))?;
        reply_rx
            .await
            .map_err(|_| Error::storage_unavailable("Database writer dropped the job"))?
    }
}

/// Start the writer thread. It exits once every `WriteHandle` is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    let spawned = std::thread::Builder::new()
        .name("pharmapos-db-writer".to_string())
        .spawn(move || {
            let mut conn: Option<DbConnection> = None;
            while let Some(job) = rx.blocking_recv() {
                if conn.is_none() {
                    match pool.get() {
                        Ok(acquired) => conn = Some(acquired),
                        Err(err) => {
                            error!("Writer could not acquire a connection: {}", err);
                            job(Err(Error::from(StorageError::from(err))));
                            continue;
                        }
                    }
                }
                if let Some(conn) = conn.as_mut() {
                    job(Ok(&mut **conn));
                }
            }
            debug!("Database writer stopped");
        });

    if let Err(err) = spawned {
        // Jobs sent to a handle whose receiver is gone fail with StorageUnavailable.
        error!("Failed to start database writer thread: {}", err);
    }

    WriteHandle { tx }
}
