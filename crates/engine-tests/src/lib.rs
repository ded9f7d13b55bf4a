#![allow(dead_code)]

use engine_config::process::persist::ProcessConfigurationPersistService;
use engine_core::{
    barrier::DistributedBarrier, context::progress::JobItemProgressPersistService,
    repository::memory::MemoryClusterRepository,
};
use engine_processing::fixture::{
    RecordingConnector, ScriptEnd, ScriptedIncrementalDumperCreator,
    ScriptedInventoryDumperCreator, StaticMetaDataLoader,
};
use engine_runtime::{
    engine::ExecuteEngine,
    job::{JobCollaborators, PipelineJobConfiguration, manager::PipelineJobManager, worker::PipelineJobWorker},
};
use model::{job::JobDataNodeLine, records::record::Record};
use std::{sync::Arc, time::Duration};

pub mod utils;

const TARGET_DATABASE: &str = "sharding_db";

/// One worker process of a test cluster, with its own repository session.
pub struct TestNode {
    pub session: MemoryClusterRepository,
    pub manager: PipelineJobManager,
    pub connector: Arc<RecordingConnector>,
    pub incremental: ScriptedIncrementalDumperCreator,
    pub inventory: ScriptedInventoryDumperCreator,
}

/// What a node reads from its sources and how its target behaves.
pub struct NodeSetup {
    pub inventory: ScriptedInventoryDumperCreator,
    pub script: Vec<Record>,
    pub connector: RecordingConnector,
    pub barrier_timeout: Duration,
}

impl Default for NodeSetup {
    fn default() -> Self {
        Self {
            inventory: ScriptedInventoryDumperCreator::default(),
            script: Vec::new(),
            connector: RecordingConnector::default(),
            barrier_timeout: Duration::from_secs(5),
        }
    }
}

/// Joins the cluster behind `cluster` on a new session.
async fn join_cluster(cluster: &MemoryClusterRepository, setup: NodeSetup) -> TestNode {
    let session = cluster.connect();
    let barrier = Arc::new(DistributedBarrier::new(Arc::new(session.clone())));
    let incremental = ScriptedIncrementalDumperCreator::new(setup.script, ScriptEnd::Tail);
    let connector = Arc::new(setup.connector);
    let collaborators = JobCollaborators {
        incremental_dumper_creator: Arc::new(incremental.clone()),
        inventory_dumper_creator: Arc::new(setup.inventory.clone()),
        connector: connector.clone(),
        metadata: Arc::new(StaticMetaDataLoader::default()),
        engine: ExecuteEngine::new(format!("node-{}", session.session_id())),
    };
    let worker = Arc::new(PipelineJobWorker::new(
        barrier.clone(),
        ProcessConfigurationPersistService::new(Arc::new(session.clone())),
        JobItemProgressPersistService::new(Arc::new(session.clone())),
        collaborators,
    ));
    let manager = PipelineJobManager::start(barrier, worker, setup.barrier_timeout)
        .await
        .expect("start job manager");

    TestNode {
        session,
        manager,
        connector,
        incremental,
        inventory: setup.inventory,
    }
}

/// Migration job with one sharding item per line.
fn migration_job(lines: &[&str]) -> PipelineJobConfiguration {
    let lines: Vec<JobDataNodeLine> = lines
        .iter()
        .map(|line| line.parse().expect("parse data node line"))
        .collect();
    PipelineJobConfiguration::migration(lines, TARGET_DATABASE).with_retry_times(1)
}
