//! Optimistic read-check-mutate-commit with bounded retries.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use stockguard_common::{
    CancelSignal, EntityId, FailureKind, OperationResult, Result, StockGuardError,
};

use crate::entity::VersionedEntity;
use crate::metrics::{ExecutorMetrics, SharedExecutorMetrics};
use crate::policy::RetryPolicy;
use crate::source::VersionSource;

/// Applies mutations to versioned entities without holding locks.
///
/// Each attempt reads the committed version, checks it against the entity,
/// runs the mutation on a working copy and commits through
/// [`VersionSource::commit`]. A stale entity is reloaded from the source
/// before the next attempt, so a retry sees the winner's fields.
#[derive(Debug, Clone)]
pub struct VersionedUpdateExecutor {
    policy: RetryPolicy,
    metrics: SharedExecutorMetrics,
}

impl Default for VersionedUpdateExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// How a single attempt ended when it did not commit.
enum Attempt {
    Done(OperationResult),
    Conflict,
}

impl VersionedUpdateExecutor {
    /// Create an executor with `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: Arc::new(ExecutorMetrics::new()),
        }
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Metrics handle.
    pub fn metrics(&self) -> SharedExecutorMetrics {
        self.metrics.clone()
    }

    /// Apply `mutate` to `entity` under optimistic versioning.
    ///
    /// `mutate` returns `Ok(true)` to commit, `Ok(false)` to reject (never
    /// retried). An `Err` carrying [`StockGuardError::MutationRejected`] is a
    /// rejection with a reason; any other `Err` fails the update and leaves
    /// the entity untouched.
    ///
    /// On success the caller's `entity` holds the committed state. After a
    /// conflict it holds the latest state reloaded from `source`.
    ///
    /// # Errors
    ///
    /// Only errors raised by `source` itself; every outcome of the update is
    /// reported in the returned [`OperationResult`].
    pub async fn execute_versioned<E, S, F>(
        &self,
        source: &S,
        entity: Option<&mut E>,
        mutate: F,
    ) -> Result<OperationResult>
    where
        E: VersionedEntity,
        S: VersionSource<E> + ?Sized,
        F: FnMut(&mut E) -> Result<bool> + Send,
    {
        self.execute_versioned_with_cancel(source, entity, mutate, &CancelSignal::never())
            .await
    }

    /// [`execute_versioned`](Self::execute_versioned) that stops waiting
    /// between retries once `cancel` fires, reporting
    /// [`FailureKind::Interrupted`].
    pub async fn execute_versioned_with_cancel<E, S, F>(
        &self,
        source: &S,
        entity: Option<&mut E>,
        mut mutate: F,
        cancel: &CancelSignal,
    ) -> Result<OperationResult>
    where
        E: VersionedEntity,
        S: VersionSource<E> + ?Sized,
        F: FnMut(&mut E) -> Result<bool> + Send,
    {
        let Some(entity) = entity else {
            self.metrics.entity_missing();
            warn!("Versioned update called without an entity");
            return Ok(OperationResult::failure(
                FailureKind::MissingEntity,
                "entity is missing",
                0,
            ));
        };

        let id = entity.entity_id().clone();
        self.run(source, entity, &id, &mut mutate, cancel).await
    }

    /// Load `id` from `source`, then update it as
    /// [`execute_versioned`](Self::execute_versioned) does.
    ///
    /// Returns the outcome together with the entity's final state, or `None`
    /// if the source does not know `id`.
    #[instrument(skip(self, source, mutate, cancel), fields(entity_id = %id))]
    pub async fn execute_by_id<E, S, F>(
        &self,
        source: &S,
        id: &EntityId,
        mut mutate: F,
        cancel: &CancelSignal,
    ) -> Result<(OperationResult, Option<E>)>
    where
        E: VersionedEntity,
        S: VersionSource<E> + ?Sized,
        F: FnMut(&mut E) -> Result<bool> + Send,
    {
        let Some(mut entity) = source.reload(id).await? else {
            self.metrics.entity_missing();
            debug!(entity_id = %id, "Entity not found");
            return Ok((
                OperationResult::failure(
                    FailureKind::MissingEntity,
                    format!("entity {id} not found"),
                    0,
                ),
                None,
            ));
        };

        let outcome = self.run(source, &mut entity, id, &mut mutate, cancel).await?;
        Ok((outcome, Some(entity)))
    }

    async fn run<E, S, F>(
        &self,
        source: &S,
        entity: &mut E,
        id: &EntityId,
        mutate: &mut F,
        cancel: &CancelSignal,
    ) -> Result<OperationResult>
    where
        E: VersionedEntity,
        S: VersionSource<E> + ?Sized,
        F: FnMut(&mut E) -> Result<bool> + Send,
    {
        let mut retries: u32 = 0;

        loop {
            match self.attempt(source, entity, id, mutate, retries).await? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Conflict => {}
            }

            self.metrics.conflict();
            if retries >= self.policy.max_retries {
                self.metrics.exhausted();
                warn!(
                    entity_id = %id,
                    retries,
                    "Version conflict not resolved within retry budget"
                );
                return Ok(OperationResult::failure(
                    FailureKind::VersionConflict,
                    format!("version conflict on {id} after {retries} retries"),
                    retries,
                ));
            }

            let delay = self.policy.delay_for_attempt(retries);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.metrics.interrupted();
                    warn!(entity_id = %id, retries, "Versioned update interrupted");
                    return Ok(OperationResult::failure(
                        FailureKind::Interrupted,
                        format!("interrupted while waiting to retry {id}"),
                        retries,
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            retries += 1;

            match source.reload(id).await? {
                Some(fresh) => *entity = fresh,
                None => {
                    self.metrics.entity_missing();
                    return Ok(OperationResult::failure(
                        FailureKind::MissingEntity,
                        format!("entity {id} disappeared during retry"),
                        retries,
                    ));
                }
            }
        }
    }

    async fn attempt<E, S, F>(
        &self,
        source: &S,
        entity: &mut E,
        id: &EntityId,
        mutate: &mut F,
        retries: u32,
    ) -> Result<Attempt>
    where
        E: VersionedEntity,
        S: VersionSource<E> + ?Sized,
        F: FnMut(&mut E) -> Result<bool> + Send,
    {
        let Some(current) = source.get_version(id).await? else {
            self.metrics.entity_missing();
            return Ok(Attempt::Done(OperationResult::failure(
                FailureKind::MissingEntity,
                format!("entity {id} not found"),
                retries,
            )));
        };

        let expected = entity.version();
        if expected != current {
            debug!(entity_id = %id, expected, current, retries, "Version conflict");
            return Ok(Attempt::Conflict);
        }

        let mut working = entity.clone();
        let verdict = mutate(&mut working);

        let reason = match verdict {
            Ok(true) => None,
            Ok(false) => Some((FailureKind::MutationRejected, "mutation rejected".to_string())),
            Err(StockGuardError::MutationRejected(reason)) => {
                Some((FailureKind::MutationRejected, reason))
            }
            Err(err) => Some((FailureKind::MutationFailed, err.to_string())),
        };

        if let Some((kind, message)) = reason {
            if kind == FailureKind::MutationFailed {
                self.metrics.mutation_failed();
                error!(entity_id = %id, error = %message, "Mutation failed");
            } else {
                self.metrics.rejected();
                debug!(entity_id = %id, reason = %message, "Mutation rejected");
            }
            return Ok(Attempt::Done(OperationResult::failure(kind, message, retries)));
        }

        let next = current + 1;
        working.set_version(next);

        if !source.commit(&working, current).await? {
            debug!(entity_id = %id, expected = current, "Commit lost a race");
            return Ok(Attempt::Conflict);
        }

        *entity = working;
        self.metrics.committed(retries);
        debug!(entity_id = %id, version = next, retries, "Versioned update committed");

        Ok(Attempt::Done(OperationResult::success(
            format!("{id} updated to version {next}"),
            retries,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::Counter;
    use crate::source::InMemoryVersionSource;
    use stockguard_common::cancel_pair;

    fn seeded(value: i64, version: u64) -> InMemoryVersionSource<Counter> {
        let source = InMemoryVersionSource::new();
        source.insert(Counter::new("c", value, version));
        source
    }

    #[tokio::test]
    async fn test_commit_increments_version() {
        let source = seeded(1, 0);
        let executor = VersionedUpdateExecutor::default();
        let mut entity = source.get(&EntityId::new("c")).unwrap();

        let outcome = executor
            .execute_versioned(&source, Some(&mut entity), |c: &mut Counter| {
                c.value += 1;
                Ok(true)
            })
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(entity.version, 1);
        assert_eq!(source.get(&EntityId::new("c")).unwrap(), entity);
    }

    #[tokio::test]
    async fn test_missing_entity_fails_immediately() {
        let source = seeded(0, 0);
        let executor = VersionedUpdateExecutor::default();
        let mut calls = 0;

        let outcome = executor
            .execute_versioned(&source, None::<&mut Counter>, |_| {
                calls += 1;
                Ok(true)
            })
            .await
            .unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::MissingEntity));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let source = seeded(0, 2);
        let executor = VersionedUpdateExecutor::default();
        let mut entity = source.get(&EntityId::new("c")).unwrap();
        let mut calls = 0;

        let outcome = executor
            .execute_versioned(&source, Some(&mut entity), |_| {
                calls += 1;
                Err(StockGuardError::MutationRejected("insufficient stock".to_string()))
            })
            .await
            .unwrap();

        assert!(outcome.is_rejected());
        assert_eq!(outcome.message, "insufficient stock");
        assert_eq!(calls, 1);
        assert_eq!(source.get(&EntityId::new("c")).unwrap().version, 2);
        assert_eq!(executor.metrics().snapshot().rejections, 1);
    }

    #[tokio::test]
    async fn test_mutation_error_leaves_entity_untouched() {
        let source = seeded(5, 1);
        let executor = VersionedUpdateExecutor::default();
        let mut entity = source.get(&EntityId::new("c")).unwrap();

        let outcome = executor
            .execute_versioned(&source, Some(&mut entity), |c: &mut Counter| {
                c.value = 999;
                Err(StockGuardError::InternalError("boom".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::MutationFailed));
        assert_eq!(entity, Counter::new("c", 5, 1));
        assert_eq!(source.get(&EntityId::new("c")).unwrap(), entity);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_wait_interrupts() {
        let source = seeded(0, 4);
        let executor = VersionedUpdateExecutor::new(
            RetryPolicy::builder()
                .retry_delay(std::time::Duration::from_secs(10))
                .max_delay(std::time::Duration::from_secs(10))
                .build(),
        );
        let mut stale = Counter::new("c", 0, 3);
        let (cancel, signal) = cancel_pair();
        cancel.cancel();

        let outcome = executor
            .execute_versioned_with_cancel(&source, Some(&mut stale), |_| Ok(true), &signal)
            .await
            .unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::Interrupted));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(source.get(&EntityId::new("c")).unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_execute_by_id_unknown_entity() {
        let source = seeded(0, 0);
        let executor = VersionedUpdateExecutor::default();

        let (outcome, entity) = executor
            .execute_by_id(
                &source,
                &EntityId::new("nope"),
                |_: &mut Counter| Ok(true),
                &CancelSignal::never(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.failure, Some(FailureKind::MissingEntity));
        assert!(entity.is_none());
    }
}
