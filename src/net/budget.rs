//! Process-wide file handle budget.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Source of file handle permits consumed once per accepted connection.
///
/// Whether `obtain` waits or fails when the budget is exhausted is up to the
/// implementation.
#[async_trait]
pub trait HandleBudget: Send + Sync {
    async fn obtain(&self) -> Result<HandlePermit>;
}

/// One unit of the handle budget. Dropping it returns the unit.
#[derive(Debug)]
pub struct HandlePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl HandlePermit {
    /// A permit not backed by any budget.
    pub fn unbounded() -> Self {
        Self { _permit: None }
    }
}

/// Semaphore-backed budget. `obtain` waits while all handles are in use.
#[derive(Debug, Clone)]
pub struct FileHandleBudget {
    limit: Arc<Semaphore>,
    capacity: usize,
}

impl FileHandleBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Handles currently free.
    pub fn available(&self) -> usize {
        self.limit.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all further `obtain` calls.
    pub fn close(&self) {
        self.limit.close();
    }
}

#[async_trait]
impl HandleBudget for FileHandleBudget {
    async fn obtain(&self) -> Result<HandlePermit> {
        let permit = Arc::clone(&self.limit)
            .acquire_owned()
            .await
            .map_err(|_| Error::BudgetClosed)?;
        tracing::trace!(available = self.limit.available_permits(), "File handle obtained");
        Ok(HandlePermit {
            _permit: Some(permit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_return_on_drop() {
        let budget = FileHandleBudget::new(2);
        let first = budget.obtain().await.unwrap();
        let _second = budget.obtain().await.unwrap();
        assert_eq!(budget.available(), 0);

        drop(first);
        assert_eq!(budget.available(), 1);
    }

    #[tokio::test]
    async fn closed_budget_fails() {
        let budget = FileHandleBudget::new(1);
        budget.close();
        assert!(matches!(budget.obtain().await, Err(Error::BudgetClosed)));
    }
}
