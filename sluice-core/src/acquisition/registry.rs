//! Single-flight acquisition registry
//!
//! Maps content identifiers to acquisitions and guarantees at most one engine
//! invocation per identifier at a time. Concurrent requests for an
//! identifier that is being acquired attach to the same shared attempt. The
//! attempt runs in its own task, so it settles even when every request that
//! was waiting on it has gone away. An identifier whose engine pack is still
//! being released is not acquired again until the release finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{Acquisition, AcquisitionError, AcquisitionSnapshot, AcquisitionState};
use crate::content::{ContentDescriptor, ContentId};
use crate::engine::{ContentEngine, EngineError, EngineHints, catch_panic};

type AttemptFuture = Shared<BoxFuture<'static, Result<Arc<Acquisition>, AcquisitionError>>>;
type ReleaseFuture = Shared<BoxFuture<'static, ()>>;

/// Attempt in flight for one identifier.
struct PendingAcquisition {
    attempt: AttemptFuture,
    /// Tells this attempt apart from later ones for the same identifier.
    generation: u64,
    display_name: Option<String>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    resolved: HashMap<ContentId, Arc<Acquisition>>,
    pending: HashMap<ContentId, PendingAcquisition>,
    /// Engine releases still running. The entry goes away once the engine
    /// has let go of the pack.
    releasing: HashMap<ContentId, ReleaseFuture>,
    next_generation: u64,
}

impl RegistryState {
    fn is_tracked(&self, id: &ContentId) -> bool {
        self.resolved.contains_key(id)
            || self.pending.contains_key(id)
            || self.releasing.contains_key(id)
    }
}

/// How a finished attempt left the registry.
#[derive(Debug, PartialEq, Eq)]
enum Settlement {
    /// The attempt's pending entry was cleared and its result recorded.
    Recorded,
    /// Drained while in flight and nothing else tracks the identifier.
    Orphaned,
    /// Drained while in flight and a newer attempt or release owns the
    /// identifier now.
    Superseded,
}

enum Step {
    Join(AttemptFuture),
    AwaitRelease(ReleaseFuture),
}

struct RegistryInner {
    engine: Arc<dyn ContentEngine>,
    metadata_timeout: Duration,
    /// Both maps behind one lock so check-then-create is atomic. Never held
    /// across an await.
    state: Mutex<RegistryState>,
    invocations: AtomicUsize,
}

/// Identifier to acquisition map with single-flight creation.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AcquisitionRegistry {
    inner: Arc<RegistryInner>,
}

impl AcquisitionRegistry {
    pub fn new(engine: Arc<dyn ContentEngine>, metadata_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                engine,
                metadata_timeout,
                state: Mutex::new(RegistryState::default()),
                invocations: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the acquisition for `descriptor`, creating it if needed.
    ///
    /// An existing acquisition is returned without touching the engine. A
    /// running attempt is joined. A pack still being released is waited out
    /// first. Otherwise a new attempt is started; it resolves once the
    /// engine has published metadata.
    ///
    /// # Errors
    /// - `AcquisitionError::EngineInvocation` - Engine rejected the add or failed the pack
    /// - `AcquisitionError::AcquisitionTimeout` - Metadata did not arrive in time
    pub async fn acquire(
        &self,
        descriptor: ContentDescriptor,
        hints: EngineHints,
    ) -> Result<Arc<Acquisition>, AcquisitionError> {
        let id = descriptor.id;
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                if let Some(release) = state.releasing.get(&id) {
                    Step::AwaitRelease(release.clone())
                } else if let Some(acquisition) = state.resolved.get(&id) {
                    debug!("Acquisition {} already resolved", id);
                    return Ok(Arc::clone(acquisition));
                } else if let Some(pending) = state.pending.get(&id) {
                    debug!("Joining pending acquisition {}", id);
                    Step::Join(pending.attempt.clone())
                } else {
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    let attempt = self.start_attempt(descriptor.clone(), hints.clone(), generation);
                    state.pending.insert(
                        id,
                        PendingAcquisition {
                            attempt: attempt.clone(),
                            generation,
                            display_name: descriptor.display_name.clone(),
                            started_at: Utc::now(),
                        },
                    );
                    Step::Join(attempt)
                }
            };

            match step {
                Step::Join(attempt) => return attempt.await,
                Step::AwaitRelease(release) => {
                    debug!("Waiting for engine to release {} before re-adding", id);
                    release.await;
                }
            }
        }
    }

    /// Spawns the engine invocation. Called with the state lock held; the
    /// spawned task takes the lock only to settle, after the pending entry
    /// is in place.
    fn start_attempt(
        &self,
        descriptor: ContentDescriptor,
        hints: EngineHints,
        generation: u64,
    ) -> AttemptFuture {
        let id = descriptor.id;
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let result = match catch_panic(inner.run_attempt(&descriptor, &hints)).await {
                Ok(result) => result,
                Err(message) => {
                    error!("Acquisition {} panicked: {}", id, message);
                    Err(AcquisitionError::EngineInvocation {
                        id,
                        source: EngineError::Failed {
                            reason: format!("engine panicked: {message}"),
                        },
                    })
                }
            };

            match Arc::clone(&inner).settle(id, generation, &result) {
                Settlement::Recorded => {}
                Settlement::Orphaned => debug!("Releasing drained acquisition {}", id),
                Settlement::Superseded => {
                    debug!("Drained acquisition {} was superseded, keeping its pack", id)
                }
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|join_error| {
                Err(AcquisitionError::EngineInvocation {
                    id,
                    source: EngineError::Failed {
                        reason: join_error.to_string(),
                    },
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Resolved acquisition for `id`.
    pub fn get(&self, id: &ContentId) -> Option<Arc<Acquisition>> {
        self.inner.state.lock().resolved.get(id).cloned()
    }

    pub fn state(&self, id: &ContentId) -> AcquisitionState {
        let state = self.inner.state.lock();
        if state.resolved.contains_key(id) {
            AcquisitionState::MetadataReady
        } else if state.pending.contains_key(id) {
            AcquisitionState::Pending
        } else {
            AcquisitionState::Unknown
        }
    }

    /// Snapshot of one tracked acquisition, pending or resolved.
    pub fn snapshot(&self, id: &ContentId) -> Option<AcquisitionSnapshot> {
        let resolved = {
            let state = self.inner.state.lock();
            match state.resolved.get(id) {
                Some(acquisition) => Arc::clone(acquisition),
                None => {
                    return state.pending.get(id).map(|pending| {
                        AcquisitionSnapshot::pending(
                            *id,
                            pending.display_name.as_deref(),
                            pending.started_at,
                        )
                    });
                }
            }
        };
        Some(resolved.snapshot())
    }

    /// Snapshots of every tracked acquisition, oldest first. Attempts still
    /// waiting for metadata are included as pending entries.
    pub fn list(&self) -> Vec<AcquisitionSnapshot> {
        let (resolved, mut snapshots): (Vec<_>, Vec<_>) = {
            let state = self.inner.state.lock();
            let resolved = state.resolved.values().cloned().collect();
            let pending = state
                .pending
                .iter()
                .map(|(id, pending)| {
                    AcquisitionSnapshot::pending(
                        *id,
                        pending.display_name.as_deref(),
                        pending.started_at,
                    )
                })
                .collect();
            (resolved, pending)
        };

        snapshots.extend(resolved.iter().map(|acquisition| acquisition.snapshot()));
        snapshots.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.info_hash.cmp(&b.info_hash))
        });
        snapshots
    }

    /// Removes a resolved acquisition and releases its engine resources.
    /// Returns once the engine has let go of the pack; acquires of `id` made
    /// meanwhile wait for that and then start fresh.
    ///
    /// # Errors
    /// - `AcquisitionError::UnknownIdentifier` - No resolved acquisition for `id`
    pub async fn remove(&self, id: &ContentId) -> Result<(), AcquisitionError> {
        let (acquisition, release) = {
            let mut state = self.inner.state.lock();
            let acquisition = state
                .resolved
                .remove(id)
                .ok_or(AcquisitionError::UnknownIdentifier { id: *id })?;
            let release = Arc::clone(&self.inner).start_release(&mut state, *id);
            (acquisition, release)
        };

        release.await;
        info!("Removed acquisition {} ({})", id, acquisition.name());
        Ok(())
    }

    /// Removes every acquisition. Attempts still in flight are forgotten and
    /// release their pack when they settle. Returns how many were dropped.
    pub async fn drain(&self) -> usize {
        let (releases, pending) = {
            let mut state = self.inner.state.lock();
            let resolved: Vec<_> = state.resolved.drain().map(|(id, _)| id).collect();
            let pending = state.pending.drain().count();
            let releases: Vec<_> = resolved
                .into_iter()
                .map(|id| Arc::clone(&self.inner).start_release(&mut state, id))
                .collect();
            (releases, pending)
        };

        let resolved = releases.len();
        futures::future::join_all(releases).await;
        info!(
            "Registry drained: {} resolved, {} pending",
            resolved, pending
        );
        resolved + pending
    }

    /// Number of engine `add` calls made so far.
    pub fn invocation_count(&self) -> usize {
        self.inner.invocations.load(Ordering::SeqCst)
    }

    /// Backend name of the engine.
    pub fn engine_name(&self) -> &'static str {
        self.inner.engine.name()
    }
}

impl RegistryInner {
    async fn run_attempt(
        &self,
        descriptor: &ContentDescriptor,
        hints: &EngineHints,
    ) -> Result<Arc<Acquisition>, AcquisitionError> {
        let id = descriptor.id;
        self.invocations.fetch_add(1, Ordering::SeqCst);
        info!(
            "Starting acquisition {} on {} engine ({} announce endpoints)",
            id,
            self.engine.name(),
            hints.announce.len()
        );

        let pack = match self.engine.add(descriptor, hints).await {
            Ok(pack) => pack,
            Err(EngineError::Duplicate { .. }) => match self.engine.get(&id) {
                Some(pack) => {
                    if let Some(reason) = pack.status().borrow().error.clone() {
                        error!("Engine's existing pack for {} has failed: {}", id, reason);
                        return Err(AcquisitionError::EngineInvocation {
                            id,
                            source: EngineError::Failed { reason },
                        });
                    }
                    warn!("Engine already tracks {}, reusing its pack", id);
                    pack
                }
                None => {
                    error!("Engine reported {} as duplicate but has no pack for it", id);
                    return Err(AcquisitionError::EngineInvocation {
                        id,
                        source: EngineError::Duplicate { id },
                    });
                }
            },
            Err(source) => {
                error!("Engine rejected {}: {}", id, source);
                return Err(AcquisitionError::EngineInvocation { id, source });
            }
        };

        let acquisition = Arc::new(Acquisition::new(pack, descriptor.display_name.clone()));
        if let Err(e) = acquisition.wait_for_metadata(self.metadata_timeout).await {
            error!("Acquisition {} failed: {}", id, e);
            if let Err(remove_error) = self.engine.remove(&id).await {
                debug!("Engine cleanup of {} failed: {}", id, remove_error);
            }
            return Err(e);
        }

        info!(
            "Acquisition {} ready: {} ({} files)",
            id,
            acquisition.name(),
            acquisition.files().len()
        );
        Ok(acquisition)
    }

    /// Clears this attempt's pending entry and records a success. A
    /// drained attempt whose pack nobody else tracks gets released.
    fn settle(
        self: Arc<Self>,
        id: ContentId,
        generation: u64,
        result: &Result<Arc<Acquisition>, AcquisitionError>,
    ) -> Settlement {
        let mut state = self.state.lock();
        let owned = state
            .pending
            .get(&id)
            .is_some_and(|pending| pending.generation == generation);

        if owned {
            state.pending.remove(&id);
            if let Ok(acquisition) = result {
                state.resolved.insert(id, Arc::clone(acquisition));
            }
            return Settlement::Recorded;
        }

        if state.is_tracked(&id) {
            return Settlement::Superseded;
        }
        if result.is_ok() {
            // Not awaited; the entry keeps new acquires off the pack until
            // the engine is done with it.
            drop(Arc::clone(&self).start_release(&mut state, id));
        }
        Settlement::Orphaned
    }

    /// Spawns the engine release of `id` and records it under the state
    /// lock held by the caller.
    fn start_release(self: Arc<Self>, state: &mut RegistryState, id: ContentId) -> ReleaseFuture {
        let task = tokio::spawn(async move {
            if let Err(e) = self.engine.remove(&id).await {
                warn!("Engine could not release {}: {}", id, e);
            }
            self.state.lock().releasing.remove(&id);
        });

        let release = async move {
            if let Err(e) = task.await {
                error!("Release task for {} did not finish: {}", id, e);
            }
        }
        .boxed()
        .shared();
        state.releasing.insert(id, release.clone());
        release
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::engine::test_mocks::{AddBehavior, ScriptedEngine};

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn setup(engine: ScriptedEngine) -> (Arc<ScriptedEngine>, AcquisitionRegistry) {
        let engine = Arc::new(engine);
        let registry = AcquisitionRegistry::new(Arc::clone(&engine) as _, TIMEOUT);
        (engine, registry)
    }

    fn movie_engine() -> ScriptedEngine {
        ScriptedEngine::with_files(&[("sample.txt", 10), ("movie.mp4", 5000)])
    }

    fn descriptor(byte: u8) -> ContentDescriptor {
        ContentDescriptor::from_id(ContentId::new([byte; 20]))
    }

    async fn acquire(
        registry: &AcquisitionRegistry,
        byte: u8,
    ) -> Result<Arc<Acquisition>, AcquisitionError> {
        registry
            .acquire(descriptor(byte), EngineHints::default())
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_invoke_engine_once() {
        let (engine, registry) =
            setup(movie_engine().with_add_delay(Duration::from_millis(200)));

        let results = join_all((0..8).map(|_| acquire(&registry, 1))).await;

        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(engine.invocation_count(), 1);
        assert_eq!(registry.invocation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_across_tasks() {
        let (engine, registry) = setup(
            movie_engine()
                .with_add_delay(Duration::from_millis(50))
                .with_metadata_delay(Duration::from_millis(500)),
        );

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { acquire(&registry, 2).await })
            })
            .collect();
        let ids: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().id())
            .collect();

        assert!(ids.iter().all(|id| *id == ContentId::new([2; 20])));
        assert_eq!(engine.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_reacquire_returns_same_acquisition() {
        let (engine, registry) = setup(movie_engine());

        let first = acquire(&registry, 3).await.unwrap();
        let second = acquire(&registry, 3).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.files(), second.files());
        assert_eq!(engine.invocation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_metadata_ready() {
        let (_engine, registry) =
            setup(movie_engine().with_metadata_delay(Duration::from_secs(1)));
        let id = ContentId::new([4; 20]);
        assert_eq!(registry.state(&id), AcquisitionState::Unknown);

        let task = tokio::spawn({
            let registry = registry.clone();
            async move { acquire(&registry, 4).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.state(&id), AcquisitionState::Pending);
        assert!(registry.get(&id).is_none());
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, AcquisitionState::Pending);
        assert_eq!(
            registry.snapshot(&id).map(|s| s.state),
            Some(AcquisitionState::Pending)
        );

        let acquisition = task.await.unwrap().unwrap();
        assert_eq!(registry.state(&id), AcquisitionState::MetadataReady);
        assert_eq!(acquisition.files().len(), 2);
        assert_eq!(registry.list()[0].state, AcquisitionState::MetadataReady);
    }

    #[tokio::test]
    async fn test_rejected_add_clears_pending_and_allows_retry() {
        let (engine, registry) = setup(movie_engine().with_behavior(AddBehavior::Reject(
            EngineError::InvalidHints {
                reason: "bad tracker".to_string(),
            },
        )));

        let error = acquire(&registry, 5).await.unwrap_err();
        assert!(matches!(
            error,
            AcquisitionError::EngineInvocation {
                source: EngineError::InvalidHints { .. },
                ..
            }
        ));
        assert_eq!(registry.state(&ContentId::new([5; 20])), AcquisitionState::Unknown);

        engine.set_behavior(AddBehavior::Accept);
        acquire(&registry, 5).await.unwrap();
        assert_eq!(engine.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_pack_failure_releases_engine_side() {
        let (engine, registry) = setup(
            movie_engine().with_behavior(AddBehavior::FailAfterAdd("no peers".to_string())),
        );

        let error = acquire(&registry, 6).await.unwrap_err();
        assert!(matches!(error, AcquisitionError::EngineInvocation { .. }));
        assert_eq!(engine.removal_count(), 1);
        assert!(engine.pack(&ContentId::new([6; 20])).is_none());
        assert!(registry.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout_returns_identifier_to_unknown() {
        let (engine, registry) = setup(movie_engine().with_behavior(AddBehavior::Stall));

        let error = acquire(&registry, 7).await.unwrap_err();

        assert!(matches!(
            error,
            AcquisitionError::AcquisitionTimeout { timeout, .. } if timeout == TIMEOUT
        ));
        assert_eq!(registry.state(&ContentId::new([7; 20])), AcquisitionState::Unknown);
        assert_eq!(engine.removal_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_answer_reuses_engine_pack() {
        let (engine, registry) = setup(movie_engine().with_behavior(AddBehavior::Duplicate));

        let acquisition = acquire(&registry, 8).await.unwrap();

        assert_eq!(acquisition.files().len(), 2);
        assert_eq!(
            registry.state(&ContentId::new([8; 20])),
            AcquisitionState::MetadataReady
        );
        assert_eq!(engine.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_without_engine_pack_is_surfaced() {
        let (_engine, registry) =
            setup(movie_engine().with_behavior(AddBehavior::DuplicateWithoutHandle));

        let error = acquire(&registry, 9).await.unwrap_err();
        assert!(matches!(
            error,
            AcquisitionError::EngineInvocation {
                source: EngineError::Duplicate { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_survives_dropped_waiters() {
        let (engine, registry) =
            setup(movie_engine().with_metadata_delay(Duration::from_secs(2)));
        let id = ContentId::new([10; 20]);

        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { acquire(&registry, 10).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(registry.state(&id), AcquisitionState::MetadataReady);

        // The resolved entry serves later requests without a new invocation.
        acquire(&registry, 10).await.unwrap();
        assert_eq!(engine.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (engine, registry) = setup(movie_engine());
        let id = ContentId::new([11; 20]);

        assert!(matches!(
            registry.remove(&id).await,
            Err(AcquisitionError::UnknownIdentifier { .. })
        ));

        acquire(&registry, 11).await.unwrap();
        registry.remove(&id).await.unwrap();

        assert_eq!(registry.state(&id), AcquisitionState::Unknown);
        assert_eq!(engine.removal_count(), 1);
        assert!(registry.remove(&id).await.is_err());

        // A removed identifier can be acquired again from scratch.
        acquire(&registry, 11).await.unwrap();
        assert_eq!(engine.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_drain_releases_everything() {
        let (engine, registry) = setup(movie_engine());
        acquire(&registry, 12).await.unwrap();
        acquire(&registry, 13).await.unwrap();

        assert_eq!(registry.drain().await, 2);
        assert!(registry.list().is_empty());
        assert_eq!(engine.removal_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_during_remove_waits_for_release() {
        let (engine, registry) =
            setup(movie_engine().with_remove_delay(Duration::from_millis(200)));
        let id = ContentId::new([16; 20]);
        let first = acquire(&registry, 16).await.unwrap();

        let removal = tokio::spawn({
            let registry = registry.clone();
            async move { registry.remove(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.state(&id), AcquisitionState::Unknown);

        let second = acquire(&registry, 16).await.unwrap();
        removal.await.unwrap().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.invocation_count(), 2);
        assert_eq!(engine.removal_count(), 1);
        assert!(engine.pack(&id).is_some());

        let third = acquire(&registry, 16).await.unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(engine.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_of_failed_pack_is_not_reused() {
        let (_engine, registry) = setup(
            movie_engine().with_behavior(AddBehavior::DuplicateOfFailed("torn down".to_string())),
        );

        let error = acquire(&registry, 17).await.unwrap_err();
        assert!(matches!(
            error,
            AcquisitionError::EngineInvocation {
                source: EngineError::Failed { .. },
                ..
            }
        ));
        assert_eq!(registry.state(&ContentId::new([17; 20])), AcquisitionState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_attempt_releases_its_pack() {
        let (engine, registry) =
            setup(movie_engine().with_metadata_delay(Duration::from_secs(1)));
        let id = ContentId::new([18; 20]);

        let waiter = tokio::spawn({
            let registry = registry.clone();
            async move { acquire(&registry, 18).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.drain().await, 1);

        waiter.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(registry.state(&id), AcquisitionState::Unknown);
        assert_eq!(engine.removal_count(), 1);
        assert!(engine.pack(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_attempt_leaves_newer_attempt_alone() {
        let (engine, registry) =
            setup(movie_engine().with_metadata_delay(Duration::from_secs(1)));
        let id = ContentId::new([19; 20]);

        let stale = tokio::spawn({
            let registry = registry.clone();
            async move { acquire(&registry, 19).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.drain().await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let fresh = tokio::spawn({
            let registry = registry.clone();
            async move { acquire(&registry, 19).await }
        });

        let stale = stale.await.unwrap().unwrap();
        assert_eq!(registry.state(&id), AcquisitionState::Pending);

        let fresh = fresh.await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &fresh));
        assert_eq!(engine.invocation_count(), 2);
        assert_eq!(engine.removal_count(), 0);
        assert!(engine.pack(&id).is_some());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_time_added() {
        let (_engine, registry) = setup(movie_engine());
        acquire(&registry, 14).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        acquire(&registry, 15).await.unwrap();

        let listed: Vec<_> = registry.list().into_iter().map(|s| s.info_hash).collect();
        assert_eq!(listed, vec![ContentId::new([14; 20]), ContentId::new([15; 20])]);
    }
}
