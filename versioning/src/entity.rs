//! Records that carry a monotonically increasing version.

use stockguard_common::EntityId;

/// A record guarded by optimistic versioning.
///
/// Every committed mutation increments `version` by exactly one; the executor
/// does the stamping, so mutations should never touch the version themselves.
pub trait VersionedEntity: Clone + Send + Sync + 'static {
    /// Identity of the record.
    fn entity_id(&self) -> &EntityId;

    /// Version the caller last observed.
    fn version(&self) -> u64;

    /// Overwrite the version. Called by the executor before committing.
    fn set_version(&mut self, version: u64);
}
