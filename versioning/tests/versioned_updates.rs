//! Conflict handling of the versioned update executor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use stockguard_common::{CancelSignal, EntityId, FailureKind, Result};
use stockguard_versioning::{
    InMemoryVersionSource, RetryPolicy, VersionSource, VersionedEntity, VersionedUpdateExecutor,
};

#[derive(Debug, Clone, PartialEq)]
struct Ledger {
    id: EntityId,
    balance: i64,
    version: u64,
}

impl Ledger {
    fn new(balance: i64, version: u64) -> Self {
        Self {
            id: EntityId::new("ledger"),
            balance,
            version,
        }
    }
}

impl VersionedEntity for Ledger {
    fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Reports a newer version than whatever the caller holds, forever.
struct AlwaysAhead {
    stored: Ledger,
    version_reads: AtomicU32,
    commits: AtomicU32,
}

#[async_trait]
impl VersionSource<Ledger> for AlwaysAhead {
    async fn get_version(&self, _id: &EntityId) -> Result<Option<u64>> {
        self.version_reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.stored.version + 1))
    }

    async fn reload(&self, _id: &EntityId) -> Result<Option<Ledger>> {
        Ok(Some(self.stored.clone()))
    }

    async fn commit(&self, _entity: &Ledger, _expected: u64) -> Result<bool> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// Lets another writer slip in right before the first commit.
struct RacedOnce {
    inner: InMemoryVersionSource<Ledger>,
    raced: AtomicBool,
}

#[async_trait]
impl VersionSource<Ledger> for RacedOnce {
    async fn get_version(&self, id: &EntityId) -> Result<Option<u64>> {
        self.inner.get_version(id).await
    }

    async fn reload(&self, id: &EntityId) -> Result<Option<Ledger>> {
        self.inner.reload(id).await
    }

    async fn commit(&self, entity: &Ledger, expected: u64) -> Result<bool> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            if let Some(mut other) = self.inner.get(entity.entity_id()) {
                other.balance += 100;
                other.version += 1;
                self.inner.insert(other);
            }
        }
        self.inner.commit(entity, expected).await
    }
}

#[tokio::test(start_paused = true)]
async fn stale_entity_converges_after_one_retry() {
    let source = InMemoryVersionSource::new();
    source.insert(Ledger::new(10, 4));
    let executor = VersionedUpdateExecutor::default();

    // Read at version 3; another writer has since committed version 4.
    let mut stale = Ledger::new(5, 3);
    let outcome = executor
        .execute_versioned(&source, Some(&mut stale), |ledger: &mut Ledger| {
            ledger.balance += 1;
            Ok(true)
        })
        .await
        .unwrap();

    assert!(outcome.success, "{outcome}");
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(stale, Ledger::new(11, 5));
    assert_eq!(source.get(&EntityId::new("ledger")).unwrap(), stale);
}

#[tokio::test(start_paused = true)]
async fn persistent_conflict_exhausts_retry_budget() {
    let source = AlwaysAhead {
        stored: Ledger::new(0, 7),
        version_reads: AtomicU32::new(0),
        commits: AtomicU32::new(0),
    };
    let executor = VersionedUpdateExecutor::default();
    let mut entity = Ledger::new(0, 7);
    let mut mutations = 0;

    let outcome = executor
        .execute_versioned(&source, Some(&mut entity), |_| {
            mutations += 1;
            Ok(true)
        })
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::VersionConflict));
    assert_eq!(outcome.retry_count, 3);
    assert_eq!(mutations, 0);
    assert_eq!(source.version_reads.load(Ordering::SeqCst), 4);
    assert_eq!(source.commits.load(Ordering::SeqCst), 0);
    assert_eq!(entity.version, 7);

    let snapshot = executor.metrics().snapshot();
    assert_eq!(snapshot.conflicts, 4);
    assert_eq!(snapshot.exhaustions, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_commit_race_is_retried_against_winner_state() {
    let source = RacedOnce {
        inner: InMemoryVersionSource::new(),
        raced: AtomicBool::new(false),
    };
    source.inner.insert(Ledger::new(0, 0));
    let executor = VersionedUpdateExecutor::default();

    let (outcome, entity) = executor
        .execute_by_id(
            &source,
            &EntityId::new("ledger"),
            |ledger: &mut Ledger| {
                ledger.balance += 1;
                Ok(true)
            },
            &CancelSignal::never(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(entity, Some(Ledger::new(101, 2)));
}

#[tokio::test(start_paused = true)]
async fn no_retry_policy_fails_on_first_conflict() {
    let source = InMemoryVersionSource::new();
    source.insert(Ledger::new(0, 1));
    let executor = VersionedUpdateExecutor::new(RetryPolicy::no_retry());
    let mut stale = Ledger::new(0, 0);

    let outcome = executor
        .execute_versioned(&source, Some(&mut stale), |_| Ok(true))
        .await
        .unwrap();

    assert!(outcome.is_conflict());
    assert_eq!(outcome.retry_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_never_lost() {
    let source = Arc::new(InMemoryVersionSource::new());
    source.insert(Ledger::new(0, 0));
    let executor = Arc::new(VersionedUpdateExecutor::new(
        RetryPolicy::builder().max_retries(100).build(),
    ));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let source = source.clone();
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            let (outcome, _) = executor
                .execute_by_id(
                    source.as_ref(),
                    &EntityId::new("ledger"),
                    |ledger: &mut Ledger| {
                        ledger.balance += 1;
                        Ok(true)
                    },
                    &CancelSignal::never(),
                )
                .await
                .unwrap();
            outcome.success
        }));
    }

    let mut committed = 0;
    for result in futures::future::join_all(tasks).await {
        if result.unwrap() {
            committed += 1;
        }
    }

    let final_state = source.get(&EntityId::new("ledger")).unwrap();
    assert_eq!(final_state.balance, committed);
    assert_eq!(final_state.version, committed as u64);
}

proptest! {
    #[test]
    fn version_rises_by_one_per_commit(verdicts in prop::collection::vec(any::<bool>(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let source = InMemoryVersionSource::new();
            source.insert(Ledger::new(0, 0));
            let executor = VersionedUpdateExecutor::default();
            let mut entity = Ledger::new(0, 0);
            let mut expected_version = 0u64;

            for accept in &verdicts {
                let before = entity.version;
                let outcome = executor
                    .execute_versioned(&source, Some(&mut entity), |ledger: &mut Ledger| {
                        ledger.balance += 1;
                        Ok(*accept)
                    })
                    .await
                    .unwrap();

                if *accept {
                    expected_version += 1;
                    prop_assert!(outcome.success);
                    prop_assert_eq!(entity.version, before + 1);
                } else {
                    prop_assert!(outcome.is_rejected());
                    prop_assert_eq!(entity.version, before);
                }
            }

            let stored = source.get(&EntityId::new("ledger")).unwrap();
            prop_assert_eq!(stored.version, expected_version);
            prop_assert_eq!(stored.balance as u64, expected_version);
            Ok(())
        })?;
    }
}
