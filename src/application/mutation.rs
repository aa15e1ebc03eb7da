//! Optimistic mutations: apply locally, confirm remotely, commit or roll back.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::cache::{
    CacheEntry, CacheKey, CachedValue, InvalidationGraph, MutationKind, QueryCache, mutex_lock,
};
use crate::domain::error::SyncError;

pub const METRIC_MUTATION_COMMITTED: &str = "boardsync_mutation_committed_total";
pub const METRIC_MUTATION_ROLLED_BACK: &str = "boardsync_mutation_rolled_back_total";

const TARGET: &str = "boardsync::application::mutation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Applied,
    Committed,
    RolledBack,
}

impl MutationState {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationState::Idle => "idle",
            MutationState::Applied => "applied",
            MutationState::Committed => "committed",
            MutationState::RolledBack => "rolled_back",
        }
    }

    pub fn can_advance_to(self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (MutationState::Idle, MutationState::Applied)
                | (MutationState::Applied, MutationState::Committed)
                | (MutationState::Applied, MutationState::RolledBack)
        )
    }

    pub fn is_settled(self) -> bool {
        matches!(self, MutationState::Committed | MutationState::RolledBack)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user saw at `key` right before the optimistic change.
#[derive(Debug, Clone)]
pub struct MutationSnapshot {
    pub key: CacheKey,
    pub prior: CacheEntry,
    pub version: u64,
}

/// How a settled run ended.
#[derive(Debug)]
pub struct Settlement<R> {
    pub id: Uuid,
    pub state: MutationState,
    pub result: Result<R, SyncError>,
}

struct MutationRun {
    id: Uuid,
    state: MutationState,
}

impl MutationRun {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: MutationState::Idle,
        }
    }

    fn advance(&mut self, next: MutationState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal mutation transition {} -> {}",
            self.state,
            next
        );
        debug!(target: TARGET, from = %self.state, state = %next, "mutation state changed");
        self.state = next;
    }
}

/// Restores the snapshot if a run is dropped between apply and settlement.
struct PendingRollback<'a> {
    cache: &'a QueryCache,
    snapshot: Option<MutationSnapshot>,
}

impl PendingRollback<'_> {
    fn disarm(mut self) -> Option<MutationSnapshot> {
        self.snapshot.take()
    }
}

impl Drop for PendingRollback<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.cache.restore(&snapshot.key, &snapshot.prior);
            warn!(
                target: TARGET,
                cache_key = %snapshot.key,
                "mutation abandoned before settling; rolled back"
            );
        }
    }
}

/// Runs optimistic mutations against the query cache.
///
/// Runs against the same key are sequenced: a second run starts only after
/// the first has committed or rolled back.
pub struct OptimisticMutationCoordinator {
    cache: QueryCache,
    turns: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl OptimisticMutationCoordinator {
    pub fn new(cache: QueryCache) -> Self {
        Self {
            cache,
            turns: Mutex::new(HashMap::new()),
        }
    }

    /// Apply `local` to the value at `key`, then call `remote`.
    ///
    /// If `local` fails nothing is sent and the run stays idle. When `remote`
    /// succeeds, `reconcile` may fold the server's answer into the cached
    /// value and the keys `kind` affects are invalidated. When it fails the
    /// entry at `key` is put back exactly as the snapshot recorded it and
    /// nothing is invalidated.
    pub async fn run<R, L, F, Fut, C>(
        &self,
        key: &CacheKey,
        kind: MutationKind,
        local: L,
        remote: F,
        reconcile: C,
    ) -> Settlement<R>
    where
        L: FnOnce(&mut CachedValue) -> Result<(), SyncError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, SyncError>>,
        C: FnOnce(&mut CachedValue, &R) -> Result<(), SyncError>,
    {
        let mut run = MutationRun::new();
        let span = info_span!(
            "mutation",
            mutation_id = %run.id,
            mutation_kind = kind.as_str(),
            cache_key = %key
        );

        let turn = self.turn_for(key);
        let result = async {
            let _turn = turn.lock().await;
            self.settle(&mut run, key, &kind, local, remote, reconcile).await
        }
        .instrument(span)
        .await;
        self.release_turn(key, turn);

        Settlement {
            id: run.id,
            state: run.state,
            result,
        }
    }

    async fn settle<R, L, F, Fut, C>(
        &self,
        run: &mut MutationRun,
        key: &CacheKey,
        kind: &MutationKind,
        local: L,
        remote: F,
        reconcile: C,
    ) -> Result<R, SyncError>
    where
        L: FnOnce(&mut CachedValue) -> Result<(), SyncError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, SyncError>>,
        C: FnOnce(&mut CachedValue, &R) -> Result<(), SyncError>,
    {
        let applied = self.cache.modify(key, local).inspect_err(|err| {
            debug!(target: TARGET, error = %err, "local change rejected; nothing sent");
        })?;
        let pending = PendingRollback {
            cache: &self.cache,
            snapshot: Some(MutationSnapshot {
                key: key.clone(),
                version: applied.prior.version,
                prior: applied.prior,
            }),
        };
        run.advance(MutationState::Applied);

        let outcome = remote().await;
        let snapshot = pending.disarm();
        match outcome {
            Ok(response) => {
                if let Err(err) = self.cache.modify(key, |value| reconcile(value, &response)) {
                    warn!(
                        target: TARGET,
                        error = %err,
                        "server response could not be folded into the cache"
                    );
                }
                run.advance(MutationState::Committed);
                counter!(METRIC_MUTATION_COMMITTED, "kind" => kind.as_str()).increment(1);
                InvalidationGraph::apply(&self.cache, kind);
                Ok(response)
            }
            Err(err) => {
                if let Some(snapshot) = &snapshot {
                    self.cache.restore(&snapshot.key, &snapshot.prior);
                }
                run.advance(MutationState::RolledBack);
                counter!(METRIC_MUTATION_ROLLED_BACK, "kind" => kind.as_str()).increment(1);
                info!(
                    target: TARGET,
                    error = %err,
                    error_kind = err.kind().as_str(),
                    snapshot_version = snapshot.as_ref().map(|s| s.version),
                    "remote call failed; rolled back"
                );
                Err(err)
            }
        }
    }

    /// Remote-only mutation: no local change, invalidate on success.
    pub async fn run_remote<R, F, Fut>(&self, kind: MutationKind, remote: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, SyncError>>,
    {
        let id = Uuid::new_v4();
        let span = info_span!("mutation", mutation_id = %id, mutation_kind = kind.as_str());
        async {
            match remote().await {
                Ok(response) => {
                    counter!(METRIC_MUTATION_COMMITTED, "kind" => kind.as_str()).increment(1);
                    InvalidationGraph::apply(&self.cache, &kind);
                    Ok(response)
                }
                Err(err) => {
                    info!(target: TARGET, error = %err, "remote mutation failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn turn_for(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut turns = mutex_lock(&self.turns, TARGET, "turn_for");
        Arc::clone(turns.entry(key.clone()).or_default())
    }

    fn release_turn(&self, key: &CacheKey, turn: Arc<tokio::sync::Mutex<()>>) {
        let mut turns = mutex_lock(&self.turns, TARGET, "release_turn");
        // Only the map and this run still hold it: nobody is queued.
        if Arc::strong_count(&turn) == 2 {
            turns.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;
    use tokio::sync::oneshot;

    use super::*;
    use crate::application::client::OfflineClient;
    use crate::cache::{CacheConfig, EntryStatus};
    use crate::domain::entities::{Author, LikeState, PostDetail};

    fn post(like_count: i64, liked: bool) -> PostDetail {
        PostDetail {
            id: 1,
            board_slug: "general".into(),
            title: "hello".into(),
            body_md: "body".into(),
            like_count,
            view_count: 0,
            liked_by_me: liked,
            og: None,
            author: Author {
                id: 1,
                nickname: "kim".into(),
                is_admin: false,
            },
            created_at: datetime!(2024-01-01 0:00 UTC),
            updated_at: datetime!(2024-01-01 0:00 UTC),
        }
    }

    fn setup() -> (QueryCache, OptimisticMutationCoordinator, CacheKey) {
        let cache = QueryCache::new(Arc::new(OfflineClient), &CacheConfig::default());
        let key = CacheKey::post_detail(1);
        cache.write(&key, CachedValue::Post(post(3, false)));
        (cache.clone(), OptimisticMutationCoordinator::new(cache), key)
    }

    fn like_kind() -> MutationKind {
        MutationKind::LikeToggle {
            post_id: 1,
            board: "general".into(),
        }
    }

    fn toggle(value: &mut CachedValue) -> Result<(), SyncError> {
        let post = value
            .as_post_mut()
            .ok_or_else(|| SyncError::not_found("post"))?;
        post.set_like_state(post.like_state().toggled());
        Ok(())
    }

    fn like_state(cache: &QueryCache, key: &CacheKey) -> Option<LikeState> {
        cache
            .peek(key)
            .and_then(|entry| entry.value)
            .and_then(|value| value.as_post().map(PostDetail::like_state))
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        assert!(MutationState::Idle.can_advance_to(MutationState::Applied));
        assert!(MutationState::Applied.can_advance_to(MutationState::Committed));
        assert!(MutationState::Applied.can_advance_to(MutationState::RolledBack));
        assert!(!MutationState::Idle.can_advance_to(MutationState::Committed));
        assert!(!MutationState::Committed.can_advance_to(MutationState::RolledBack));
        assert!(!MutationState::RolledBack.can_advance_to(MutationState::Applied));
        assert!(MutationState::RolledBack.is_settled());
    }

    #[tokio::test]
    async fn failed_remote_restores_the_snapshot() {
        let (cache, coordinator, key) = setup();
        let before = cache.peek(&key).expect("entry");
        let (release, wait) = oneshot::channel::<()>();

        let observer = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let during = like_state(&cache, &key);
                let _ = release.send(());
                during
            })
        };

        let settlement = coordinator
            .run(
                &key,
                like_kind(),
                toggle,
                || async move {
                    let _ = wait.await;
                    Err::<LikeState, _>(SyncError::network("timeout"))
                },
                |_, _| Ok(()),
            )
            .await;

        let during = observer.await.expect("observer");
        assert_eq!(
            during,
            Some(LikeState {
                liked: true,
                like_count: 4
            })
        );
        assert_eq!(settlement.state, MutationState::RolledBack);
        assert_eq!(settlement.result.map_err(|e| e.kind()), Err(crate::domain::error::ErrorKind::Network));

        let after = cache.peek(&key).expect("entry");
        assert_eq!(after.value, before.value);
        assert_eq!(after.status, EntryStatus::Success);
        assert!(!after.stale);
    }

    #[tokio::test]
    async fn committed_run_reconciles_and_invalidates() {
        let (cache, coordinator, key) = setup();

        let settlement = coordinator
            .run(
                &key,
                like_kind(),
                toggle,
                || async {
                    Ok(LikeState {
                        liked: true,
                        like_count: 10,
                    })
                },
                |value, server: &LikeState| {
                    if let Some(post) = value.as_post_mut() {
                        post.set_like_state(*server);
                    }
                    Ok(())
                },
            )
            .await;

        assert_eq!(settlement.state, MutationState::Committed);
        let entry = cache.peek(&key).expect("entry");
        assert!(entry.stale);
        assert_eq!(
            like_state(&cache, &key),
            Some(LikeState {
                liked: true,
                like_count: 10
            })
        );
    }

    #[tokio::test]
    async fn rejected_local_change_never_calls_remote() {
        let (cache, coordinator, key) = setup();
        let before = cache.peek(&key);
        let mut called = false;

        let settlement = coordinator
            .run(
                &key,
                like_kind(),
                |_| Err(SyncError::not_found("comment 9")),
                || {
                    called = true;
                    async { Ok(()) }
                },
                |_, _| Ok(()),
            )
            .await;

        assert!(!called);
        assert_eq!(settlement.state, MutationState::Idle);
        assert!(settlement.result.is_err());
        assert_eq!(cache.peek(&key), before);
    }

    #[tokio::test]
    async fn runs_on_one_key_are_sequenced() {
        let (cache, coordinator, key) = setup();
        let coordinator = Arc::new(coordinator);
        let (release_first, first_waits) = oneshot::channel::<()>();

        let first = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            tokio::spawn(async move {
                coordinator
                    .run(
                        &key,
                        like_kind(),
                        toggle,
                        || async move {
                            let _ = first_waits.await;
                            Err::<(), _>(SyncError::network("reset"))
                        },
                        |_, _| Ok(()),
                    )
                    .await
                    .state
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            tokio::spawn(async move {
                coordinator
                    .run(&key, like_kind(), toggle, || async { Ok(()) }, |_, _| Ok(()))
                    .await
                    .state
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The second toggle is queued, so only the first one is visible.
        assert_eq!(like_state(&cache, &key).map(|s| s.like_count), Some(4));
        let _ = release_first.send(());

        assert_eq!(first.await.expect("first"), MutationState::RolledBack);
        assert_eq!(second.await.expect("second"), MutationState::Committed);
        assert_eq!(like_state(&cache, &key).map(|s| s.like_count), Some(4));
    }

    #[tokio::test]
    async fn abandoned_run_is_rolled_back() {
        let (cache, coordinator, key) = setup();
        let before = cache.peek(&key).expect("entry");
        let coordinator = Arc::new(coordinator);

        let task = {
            let coordinator = Arc::clone(&coordinator);
            let key = key.clone();
            tokio::spawn(async move {
                coordinator
                    .run(
                        &key,
                        like_kind(),
                        toggle,
                        || std::future::pending::<Result<(), SyncError>>(),
                        |_, _| Ok(()),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(like_state(&cache, &key).map(|s| s.like_count), Some(4));

        task.abort();
        let _ = task.await;

        assert_eq!(cache.peek(&key).expect("entry").value, before.value);
    }
}
