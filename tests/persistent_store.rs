mod support;

use ocn_clusters::test_support::{holding, item, partition_violations, rule};
use ocn_clusters::{
    tuple_of, ClusterEngine, EngineConfig, Ocn, PersistentStore, RecordRef, ReclusterOutcome,
};
use support::init_tracing;
use tempfile::tempdir;

fn config_for(path: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.storage.data_dir = Some(path.to_path_buf());
    config.storage.sync_writes = false;
    config
}

#[test]
fn clusters_survive_restart() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let config = config_for(dir.path());

    let (cluster_id, item_count) = {
        let engine = ClusterEngine::<PersistentStore>::open(&config)?;
        engine.attach([item("i1", &[1, 2])])?;
        engine.attach([item("i2", &[2, 3])])?;
        engine.attach([holding(3, "umich", "h1")])?;
        let cluster = engine.cluster_for_ocn(Ocn(1))?.expect("cluster");
        (cluster.id, cluster.items.len())
    };

    let engine = ClusterEngine::<PersistentStore>::open(&config)?;
    let cluster = engine.cluster_for_ocn(Ocn(3))?.expect("cluster after restart");
    assert_eq!(cluster.id, cluster_id);
    assert_eq!(cluster.ocns, tuple_of([1u64, 2, 3]));
    assert_eq!(cluster.items.len(), item_count);
    assert_eq!(cluster.holdings.len(), 1);
    assert!(engine
        .cluster_for_record(&RecordRef::Item("i2".into()))?
        .is_some());
    Ok(())
}

#[test]
fn splits_after_restart_are_persisted() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let config = config_for(dir.path());

    {
        let engine = ClusterEngine::<PersistentStore>::open(&config)?;
        engine.attach([holding(1, "umich", "a")])?;
        engine.attach([holding(2, "umich", "b")])?;
        engine.attach([rule(1, 2)])?;
        assert_eq!(engine.cluster_count(), 1);
    }

    {
        let engine = ClusterEngine::<PersistentStore>::open(&config)?;
        let outcome = engine.detach(&RecordRef::EquivalenceRule(Ocn(1), Ocn(2)))?;
        assert!(matches!(outcome.recluster, ReclusterOutcome::Split(_)));
    }

    let engine = ClusterEngine::<PersistentStore>::open(&config)?;
    let clusters = engine.clusters()?;
    assert_eq!(clusters.len(), 2);
    assert!(partition_violations(&clusters, engine.large_clusters()).is_empty());
    let first = engine.cluster_for_ocn(Ocn(1))?.expect("cluster for 1");
    let second = engine.cluster_for_ocn(Ocn(2))?.expect("cluster for 2");
    assert_ne!(first.id, second.id);
    Ok(())
}

#[test]
fn restarted_store_allocates_fresh_ids() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let config = config_for(dir.path());

    let before = {
        let engine = ClusterEngine::<PersistentStore>::open(&config)?;
        engine.attach([item("a", &[10])])?;
        engine.attach([item("b", &[20])])?;
        engine.clusters()?
    };

    let engine = ClusterEngine::<PersistentStore>::open(&config)?;
    engine.attach([item("c", &[30])])?;
    let fresh = engine.cluster_for_ocn(Ocn(30))?.expect("new cluster");
    assert!(before.iter().all(|cluster| cluster.id < fresh.id));
    assert_eq!(engine.store().commit_seq(), 3);
    Ok(())
}
