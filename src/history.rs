//! Per-user generation history
//!
//! The pipeline never touches storage. A host service records each upload here
//! before processing and attaches the PNG result afterwards, so a generation
//! exists with its original image even if processing fails.

use crate::error::{BgRemovalError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Owner of stored generations
pub type UserId = u64;

/// Identifier of one stored generation, increasing in creation order
pub type GenerationId = u64;

/// Listing entry for a stored generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub id: GenerationId,
    pub created_at: DateTime<Utc>,
}

/// Storage for original uploads and their processed results
///
/// Every lookup is scoped to a user. An id that exists but belongs to someone
/// else is reported exactly like a missing one.
pub trait GenerationStore: Send + Sync {
    /// Save an original upload with no processed result yet
    ///
    /// # Errors
    /// - Backend storage failure
    fn create(&self, user_id: UserId, original: Vec<u8>) -> Result<GenerationId>;

    /// Attach the processed PNG to an existing generation
    ///
    /// # Errors
    /// - `NotFound` when the generation is missing or owned by another user
    fn attach_processed(&self, user_id: UserId, id: GenerationId, png: Vec<u8>) -> Result<()>;

    /// The user's generations, newest first
    ///
    /// # Errors
    /// - Backend storage failure
    fn list(&self, user_id: UserId) -> Result<Vec<GenerationSummary>>;

    /// Original upload bytes
    ///
    /// # Errors
    /// - `NotFound` when the generation is missing or owned by another user
    fn original(&self, user_id: UserId, id: GenerationId) -> Result<Vec<u8>>;

    /// Processed PNG bytes, empty until a result is attached
    ///
    /// # Errors
    /// - `NotFound` when the generation is missing or owned by another user
    fn processed(&self, user_id: UserId, id: GenerationId) -> Result<Vec<u8>>;

    /// Remove a generation
    ///
    /// # Errors
    /// - `NotFound` when the generation is missing or owned by another user
    fn delete(&self, user_id: UserId, id: GenerationId) -> Result<()>;
}

#[derive(Debug)]
struct Generation {
    user_id: UserId,
    original: Vec<u8>,
    processed: Vec<u8>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: GenerationId,
    generations: BTreeMap<GenerationId, Generation>,
}

/// Process-local [`GenerationStore`]
#[derive(Debug, Default)]
pub struct InMemoryGenerationStore {
    inner: RwLock<Inner>,
}

impl InMemoryGenerationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> Result<T>) -> Result<T> {
        let inner = self
            .inner
            .read()
            .map_err(|_| BgRemovalError::processing("Generation store lock poisoned"))?;
        f(&inner)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BgRemovalError::processing("Generation store lock poisoned"))?;
        f(&mut inner)
    }
}

fn not_found(id: GenerationId) -> BgRemovalError {
    BgRemovalError::not_found(format!("Generation {id} not found"))
}

fn owned(inner: &Inner, user_id: UserId, id: GenerationId) -> Result<&Generation> {
    inner
        .generations
        .get(&id)
        .filter(|generation| generation.user_id == user_id)
        .ok_or_else(|| not_found(id))
}

impl GenerationStore for InMemoryGenerationStore {
    fn create(&self, user_id: UserId, original: Vec<u8>) -> Result<GenerationId> {
        self.write(|inner| {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.generations.insert(
                id,
                Generation {
                    user_id,
                    original,
                    processed: Vec::new(),
                    created_at: Utc::now(),
                },
            );
            tracing::debug!(user_id, id, "stored original upload");
            Ok(id)
        })
    }

    fn attach_processed(&self, user_id: UserId, id: GenerationId, png: Vec<u8>) -> Result<()> {
        self.write(|inner| {
            let generation = inner
                .generations
                .get_mut(&id)
                .filter(|generation| generation.user_id == user_id)
                .ok_or_else(|| not_found(id))?;
            generation.processed = png;
            Ok(())
        })
    }

    fn list(&self, user_id: UserId) -> Result<Vec<GenerationSummary>> {
        self.read(|inner| {
            Ok(inner
                .generations
                .iter()
                .rev()
                .filter(|(_, generation)| generation.user_id == user_id)
                .map(|(&id, generation)| GenerationSummary {
                    id,
                    created_at: generation.created_at,
                })
                .collect())
        })
    }

    fn original(&self, user_id: UserId, id: GenerationId) -> Result<Vec<u8>> {
        self.read(|inner| Ok(owned(inner, user_id, id)?.original.clone()))
    }

    fn processed(&self, user_id: UserId, id: GenerationId) -> Result<Vec<u8>> {
        self.read(|inner| Ok(owned(inner, user_id, id)?.processed.clone()))
    }

    fn delete(&self, user_id: UserId, id: GenerationId) -> Result<()> {
        self.write(|inner| {
            owned(inner, user_id, id)?;
            inner.generations.remove(&id);
            Ok(())
        })
    }
}
