//! In-process store for tests and ephemeral boards.

use std::sync::{Mutex, PoisonError, RwLock};

use threadline_core::Document;

use super::{ExclusiveGuard, Store, StoreError};

/// Document held in memory; lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    document: RwLock<Document>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document.
    pub fn with_document(document: Document) -> Self {
        Self {
            document: RwLock::new(document),
            writer: Mutex::new(()),
        }
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Document, StoreError> {
        let document = self.document.read().unwrap_or_else(PoisonError::into_inner);
        Ok(document.clone())
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        let mut current = self.document.write().unwrap_or_else(PoisonError::into_inner);
        *current = document.clone();
        Ok(())
    }

    fn exclusive(&self) -> Result<ExclusiveGuard<'_>, StoreError> {
        Ok(ExclusiveGuard::local(&self.writer))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
