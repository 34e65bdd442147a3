//! Async access to the synchronous store.
//!
//! The [`Gateway`] owns the single database connection behind a
//! `tokio::sync::Mutex`.  Acquiring the connection is bounded by a timeout so
//! a wedged storage layer fails fast with [`ServerError::StorageUnavailable`]
//! instead of blocking the calling task indefinitely.  Store failures are
//! surfaced typed, never converted to empty results.

use std::time::Duration;

use tokio::sync::Mutex;

use eduswap_store::{Database, StoreError};

use crate::error::ServerError;

pub struct Gateway {
    db: Mutex<Database>,
    op_timeout: Duration,
}

impl Gateway {
    pub fn new(db: Database, op_timeout: Duration) -> Self {
        Self {
            db: Mutex::new(db),
            op_timeout,
        }
    }

    /// Run one storage operation against the connection.
    ///
    /// The closure runs while the connection lock is held; callers must not
    /// already hold any other in-memory lock when awaiting this.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Database) -> Result<T, StoreError>,
    {
        let mut guard = tokio::time::timeout(self.op_timeout, self.db.lock())
            .await
            .map_err(|_| {
                ServerError::StorageUnavailable("storage operation timed out".to_string())
            })?;

        f(&mut guard).map_err(map_store_error)
    }
}

fn map_store_error(e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::NotFound("record not found".to_string()),
        other => ServerError::StorageUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gateway() -> Gateway {
        let db = Database::open_in_memory().unwrap();
        Gateway::new(db, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn run_maps_not_found() {
        let gateway = test_gateway();

        let result = gateway
            .run(|db| db.get_swap(eduswap_shared::SwapId::new()))
            .await;

        assert!(matches!(result, Err(ServerError::NotFound(_))));
    }

    #[tokio::test]
    async fn run_times_out_when_connection_is_held() {
        let gateway = std::sync::Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_millis(50),
        ));

        // Park a guard on the connection so the next caller cannot acquire it.
        let held = gateway.db.lock().await;

        let result = gateway.run(|_| Ok(())).await;
        assert!(matches!(result, Err(ServerError::StorageUnavailable(_))));

        drop(held);
        assert!(gateway.run(|_| Ok(())).await.is_ok());
    }
}
