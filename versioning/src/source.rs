//! Authority for committed versions.

use std::marker::PhantomData;

use async_trait::async_trait;
use dashmap::DashMap;

use stockguard_common::{EntityId, Result};

use crate::entity::VersionedEntity;

/// Where committed versions live.
///
/// `commit` is a conditional write: it applies only if the stored version
/// still equals `expected`, and says whether it did. A persistent source
/// implements it as `UPDATE ... WHERE version = $expected` and checks that
/// exactly one row changed.
#[async_trait]
pub trait VersionSource<E: VersionedEntity>: Send + Sync {
    /// Committed version of `id`, or `None` if the source does not know it.
    async fn get_version(&self, id: &EntityId) -> Result<Option<u64>>;

    /// Fresh copy of `id` with its committed fields and version.
    async fn reload(&self, id: &EntityId) -> Result<Option<E>>;

    /// Write `entity` if the stored version equals `expected`.
    async fn commit(&self, entity: &E, expected: u64) -> Result<bool>;
}

/// Process-local [`VersionSource`].
///
/// The version check and the write happen under the same shard lock, so
/// concurrent commits against one entity serialize. Nothing is shared across
/// processes.
#[derive(Debug)]
pub struct InMemoryVersionSource<E> {
    entries: DashMap<EntityId, E>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: VersionedEntity> InMemoryVersionSource<E> {
    /// Create an empty source.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            _entity: PhantomData,
        }
    }

    /// Insert or replace a record as-is.
    pub fn insert(&self, entity: E) {
        self.entries.insert(entity.entity_id().clone(), entity);
    }

    /// Snapshot of a record.
    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Forget a record.
    pub fn evict(&self, id: &EntityId) -> Option<E> {
        self.entries.remove(id).map(|(_, entity)| entity)
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no records are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E: VersionedEntity> Default for InMemoryVersionSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: VersionedEntity> VersionSource<E> for InMemoryVersionSource<E> {
    async fn get_version(&self, id: &EntityId) -> Result<Option<u64>> {
        Ok(self.entries.get(id).map(|entry| entry.version()))
    }

    async fn reload(&self, id: &EntityId) -> Result<Option<E>> {
        Ok(self.get(id))
    }

    async fn commit(&self, entity: &E, expected: u64) -> Result<bool> {
        match self.entries.get_mut(entity.entity_id()) {
            Some(mut stored) if stored.version() == expected => {
                *stored = entity.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
