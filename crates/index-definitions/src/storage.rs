//! Transactional storage collaborator.
//!
//! The storage engine owns the persisted indexing state of each index. When
//! an index is deleted the registry asks it, inside one batch, to mark the
//! index as being deleted and to drop that state.

use parking_lot::Mutex;

use crate::error::{DefinitionError, Result};

/// Operations available inside a storage batch.
pub trait IndexingStorageAccessor {
    fn prepare_index_for_deletion(&self, id: u32) -> Result<()>;

    fn delete_index(&self, id: u32) -> Result<()>;
}

pub trait TransactionalStorage: Send + Sync {
    /// Runs `action` inside one storage transaction.
    fn batch(&self, action: &mut dyn FnMut(&dyn IndexingStorageAccessor) -> Result<()>)
        -> Result<()>;
}

/// A storage call recorded by [`InMemoryStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCall {
    PrepareForDeletion(u32),
    Delete(u32),
}

/// Storage without a backing engine. Calls are recorded per committed batch.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    committed: Mutex<Vec<Vec<StorageCall>>>,
    fail_deletes: Mutex<bool>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed batches, oldest first.
    pub fn batches(&self) -> Vec<Vec<StorageCall>> {
        self.committed.lock().clone()
    }

    /// Makes every following `delete_index` call fail.
    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock() = fail;
    }
}

struct RecordingAccessor {
    calls: Mutex<Vec<StorageCall>>,
    fail_deletes: bool,
}

impl IndexingStorageAccessor for RecordingAccessor {
    fn prepare_index_for_deletion(&self, id: u32) -> Result<()> {
        self.calls.lock().push(StorageCall::PrepareForDeletion(id));
        Ok(())
    }

    fn delete_index(&self, id: u32) -> Result<()> {
        if self.fail_deletes {
            return Err(DefinitionError::Storage(format!(
                "failed to delete indexing state of index {id}"
            )));
        }
        self.calls.lock().push(StorageCall::Delete(id));
        Ok(())
    }
}

impl TransactionalStorage for InMemoryStorage {
    fn batch(
        &self,
        action: &mut dyn FnMut(&dyn IndexingStorageAccessor) -> Result<()>,
    ) -> Result<()> {
        let accessor = RecordingAccessor {
            calls: Mutex::new(Vec::new()),
            fail_deletes: *self.fail_deletes.lock(),
        };
        // Nothing is committed when the action fails.
        action(&accessor)?;
        self.committed.lock().push(accessor.calls.into_inner());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_batch_is_committed() {
        let storage = InMemoryStorage::new();
        storage
            .batch(&mut |accessor| {
                accessor.prepare_index_for_deletion(3)?;
                accessor.delete_index(3)
            })
            .expect("batch");

        assert_eq!(
            storage.batches(),
            vec![vec![StorageCall::PrepareForDeletion(3), StorageCall::Delete(3)]]
        );
    }

    #[test]
    fn failed_batch_is_rolled_back() {
        let storage = InMemoryStorage::new();
        storage.fail_deletes(true);
        let result = storage.batch(&mut |accessor| {
            accessor.prepare_index_for_deletion(3)?;
            accessor.delete_index(3)
        });

        assert!(matches!(result, Err(DefinitionError::Storage(_))));
        assert!(storage.batches().is_empty());
    }
}
