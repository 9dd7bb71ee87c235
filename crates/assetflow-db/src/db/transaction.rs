//! Transaction guard for multi-statement writes

use std::ops::{Deref, DerefMut};

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{StoreError, StoreResult};

/// Owns an open transaction until it is committed.
///
/// Dropping the guard without committing rolls the transaction back; every
/// early `?` return in a commit path therefore leaves the database untouched.
pub struct TransactionGuard<'a> {
    transaction: Option<Transaction<'a, Postgres>>,
}

impl<'a> TransactionGuard<'a> {
    pub async fn begin(pool: &'a PgPool) -> StoreResult<Self> {
        let transaction = pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("failed to begin transaction: {}", e)))?;
        Ok(Self {
            transaction: Some(transaction),
        })
    }

    pub async fn commit(mut self) -> StoreResult<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit()
                .await
                .map_err(|e| StoreError::Database(format!("failed to commit transaction: {}", e)))?;
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> StoreResult<()> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback().await.map_err(|e| {
                StoreError::Database(format!("failed to roll back transaction: {}", e))
            })?;
        }
        Ok(())
    }
}

impl<'a> Deref for TransactionGuard<'a> {
    type Target = Transaction<'a, Postgres>;

    fn deref(&self) -> &Self::Target {
        self.transaction
            .as_ref()
            .expect("Transaction was already committed or rolled back")
    }
}

impl<'a> DerefMut for TransactionGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transaction
            .as_mut()
            .expect("Transaction was already committed or rolled back")
    }
}

impl<'a> Drop for TransactionGuard<'a> {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            // sqlx queues the rollback when the inner transaction drops
            tracing::debug!("Transaction dropped without commit, rolling back");
        }
    }
}
