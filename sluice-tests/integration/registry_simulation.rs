//! Registry behavior against the simulated swarm

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use sluice_core::acquisition::{
    AcquisitionError, AcquisitionRegistry, AcquisitionState, select_primary_file,
};
use sluice_core::config::SimulationConfig;
use sluice_core::content::{ContentDescriptor, ContentId};
use sluice_core::engine::{ContentEngine, EngineHints, SimulatedEngine};

const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

fn setup() -> (Arc<SimulatedEngine>, AcquisitionRegistry) {
    let engine = Arc::new(SimulatedEngine::new(
        SimulationConfig::deterministic_testing(),
    ));
    let registry = AcquisitionRegistry::new(
        Arc::clone(&engine) as Arc<dyn ContentEngine>,
        METADATA_TIMEOUT,
    );
    (engine, registry)
}

fn descriptor(seed: u8, name: &str) -> ContentDescriptor {
    let mut descriptor = ContentDescriptor::from_id(ContentId::new([seed; 20]));
    descriptor.display_name = Some(name.to_string());
    descriptor
}

#[tokio::test]
async fn concurrent_acquires_share_one_engine_pack() {
    let (engine, registry) = setup();
    let target = descriptor(1, "Shared.Pack");

    let results = join_all(
        (0..8).map(|_| registry.acquire(target.clone(), EngineHints::default())),
    )
    .await;

    let acquisitions: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    for acquisition in &acquisitions[1..] {
        assert!(Arc::ptr_eq(&acquisitions[0], acquisition));
    }
    assert_eq!(registry.invocation_count(), 1);
    assert_eq!(engine.pack_count(), 1);
    assert_eq!(registry.state(&target.id), AcquisitionState::MetadataReady);
}

#[tokio::test]
async fn synthetic_pack_selects_its_video() {
    let (_engine, registry) = setup();
    let acquisition = registry
        .acquire(descriptor(2, "Some.Movie"), EngineHints::default())
        .await
        .unwrap();

    assert_eq!(acquisition.name(), "Some.Movie");
    let files = acquisition.files();
    assert_eq!(files.len(), 3);

    let primary = select_primary_file(files).unwrap();
    assert_eq!(primary.index, 1);
    assert_eq!(primary.name, "Some.Movie.mkv");
    assert_eq!(primary.path, "Some.Movie/Some.Movie.mkv");

    let again = registry
        .acquire(descriptor(2, "Some.Movie"), EngineHints::default())
        .await
        .unwrap();
    assert_eq!(again.files(), files);
    assert_eq!(registry.invocation_count(), 1);
}

#[tokio::test]
async fn progress_never_decreases_while_downloading() {
    let (_engine, registry) = setup();
    let acquisition = registry
        .acquire(descriptor(3, "Progressing"), EngineHints::default())
        .await
        .unwrap();

    let mut last = 0.0;
    for _ in 0..60 {
        let progress = acquisition.progress();
        assert!(progress >= last, "progress went from {last} to {progress}");
        assert!((0.0..=1.0).contains(&progress));
        last = progress;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(last > 0.0);
}

#[tokio::test]
async fn failed_attempt_is_forgotten_and_retried() {
    let (engine, registry) = setup();
    let target = descriptor(4, "Broken");
    engine.inject_failure(target.id, "no peers");

    let result = registry
        .acquire(target.clone(), EngineHints::default())
        .await;
    match result {
        Err(AcquisitionError::EngineInvocation { id, source }) => {
            assert_eq!(id, target.id);
            assert!(source.to_string().contains("no peers"));
        }
        other => panic!("expected engine failure, got {:?}", other.map(|a| a.id())),
    }
    assert_eq!(registry.state(&target.id), AcquisitionState::Unknown);
    assert_eq!(engine.pack_count(), 0);

    engine.clear_failure(&target.id);
    let acquisition = registry
        .acquire(target.clone(), EngineHints::default())
        .await
        .unwrap();
    assert!(acquisition.has_metadata());
    assert_eq!(registry.invocation_count(), 2);
}

#[tokio::test]
async fn pack_added_behind_the_registry_is_reconciled() {
    let (engine, registry) = setup();
    let target = descriptor(5, "Preloaded");
    engine
        .add(&target, &EngineHints::default())
        .await
        .unwrap();

    let acquisition = registry
        .acquire(target.clone(), EngineHints::default())
        .await
        .unwrap();
    assert_eq!(acquisition.id(), target.id);
    assert_eq!(acquisition.files().len(), 3);
    assert_eq!(engine.pack_count(), 1);
}

#[tokio::test]
async fn invalid_hints_are_an_engine_error() {
    let (engine, registry) = setup();
    let hints = EngineHints {
        announce: vec!["ftp://tracker.invalid/announce".to_string()],
    };

    let result = registry.acquire(descriptor(6, "Hinted"), hints).await;
    assert!(matches!(
        result,
        Err(AcquisitionError::EngineInvocation { .. })
    ));
    assert_eq!(engine.pack_count(), 0);
}

#[tokio::test]
async fn remove_and_drain_release_engine_packs() {
    let (engine, registry) = setup();
    let first = descriptor(7, "First");
    let second = descriptor(8, "Second");
    registry
        .acquire(first.clone(), EngineHints::default())
        .await
        .unwrap();
    registry
        .acquire(second.clone(), EngineHints::default())
        .await
        .unwrap();
    assert_eq!(registry.list().len(), 2);

    registry.remove(&first.id).await.unwrap();
    assert_eq!(engine.pack_count(), 1);
    assert!(matches!(
        registry.remove(&first.id).await,
        Err(AcquisitionError::UnknownIdentifier { .. })
    ));

    assert_eq!(registry.drain().await, 1);
    assert_eq!(engine.pack_count(), 0);
    assert!(registry.list().is_empty());
}
