//! Program Runner
//!
//! Links declared state on the local node and drives the worker instances of a
//! job.
//!
//! ## Responsibilities
//! - **Linking**: allocates every state the local node holds and registers load
//!   tasks for file-backed ones.
//! - **Job identity**: every node derives the same job id from the program name and
//!   how often it ran, so barrier tokens of consecutive runs never mix.
//! - **Execution**: one tokio task per instance, joined before the job is dropped.

use super::state::StateDescriptor;
use crate::error::{Error, Result};
use crate::matrix::{MatrixPartition, MatrixState};
use crate::sync::loading::announce_partitions;
use crate::sync::{DataManager, InstanceContext, LoadTask};

use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Type alias for a worker unit: an async closure run once per instance.
pub type UnitFn = Arc<
    dyn Fn(InstanceContext) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Declared states plus the unit that works on them.
#[derive(Clone)]
pub struct Program {
    pub name: String,
    /// Falls back to the node's configured parallelism.
    pub parallelism: Option<usize>,
    pub states: Vec<StateDescriptor>,
    unit: UnitFn,
}

impl Program {
    pub fn new<F, Fut>(name: &str, unit: F) -> Self
    where
        F: Fn(InstanceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let unit_fn: UnitFn = Arc::new(move |ctx: InstanceContext| {
            Box::pin(unit(ctx)) as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        });

        Self {
            name: name.to_string(),
            parallelism: None,
            states: Vec::new(),
            unit: unit_fn,
        }
    }

    pub fn state(mut self, state: StateDescriptor) -> Self {
        self.states.push(state);
        self
    }

    pub fn parallelism(mut self, instances: usize) -> Self {
        self.parallelism = Some(instances);
        self
    }
}

pub struct ProgramRunner {
    data: Arc<DataManager>,
    default_parallelism: usize,
    runs: DashMap<String, u64>,
}

impl ProgramRunner {
    pub fn new(data: Arc<DataManager>, default_parallelism: usize) -> Arc<Self> {
        Arc::new(Self {
            data,
            default_parallelism,
            runs: DashMap::new(),
        })
    }

    /// Job id of the `run`-th run of `program`, identical on every node.
    pub fn job_uid(program: &str, run: u64) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}#{}", program, run).as_bytes())
    }

    /// Links and runs `program`, returning the job id once every local instance
    /// finished. The first instance failure is returned instead.
    pub async fn run(&self, program: &Program) -> Result<Uuid> {
        let parallelism = program.parallelism.unwrap_or(self.default_parallelism);
        if parallelism == 0 {
            return Err(Error::Precondition(format!(
                "program '{}' needs at least one instance",
                program.name
            )));
        }

        self.link(program)?;

        let run = {
            let mut runs = self.runs.entry(program.name.clone()).or_insert(0);
            *runs += 1;
            *runs
        };
        let job_uid = Self::job_uid(&program.name, run);
        let job = self.data.register_job(job_uid, parallelism)?;

        tracing::info!(
            "Starting program '{}' as job {} with {} instances",
            program.name,
            job_uid,
            parallelism
        );

        let mut handles = Vec::with_capacity(parallelism);
        for thread_id in 0..parallelism {
            let ctx = job.instance(thread_id);
            let data = self.data.clone();
            let unit = program.unit.clone();
            handles.push(tokio::spawn(async move { run_instance(data, unit, ctx).await }));
        }

        let mut failure = None;
        for (thread_id, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Worker {
                    thread: thread_id,
                    message: e.to_string(),
                }),
            };
            if let Err(e) = outcome {
                tracing::error!("Instance {} of job {} failed: {}", thread_id, job_uid, e);
                failure.get_or_insert(e);
            }
        }

        self.data.unregister_job(&job_uid);
        match failure {
            Some(e) => Err(e),
            None => {
                tracing::info!("Program '{}' finished (job {})", program.name, job_uid);
                Ok(job_uid)
            }
        }
    }

    fn link(&self, program: &Program) -> Result<()> {
        let local = self.data.node_id();
        let nodes = self.data.number_of_nodes();

        for state in &program.states {
            if !state.allocated_on(local) {
                continue;
            }
            let partitioner = state.partitioner(local, nodes)?;

            if let Some(path) = &state.path {
                self.data.register_load_task(LoadTask {
                    name: state.name.clone(),
                    path: path.clone(),
                    format: state.record_format,
                    matrix_format: state.format,
                    layout: state.layout,
                    partitioner,
                })?;
                continue;
            }

            let partition = MatrixPartition::new(partitioner.partition_shape(), state.format, state.layout)?;
            let key = announce_partitions(
                self.data.directory(),
                self.data.transport().registry(),
                &state.name,
                partitioner.as_ref(),
                self.data.config().segment_rows,
            )?;
            self.data
                .directory()
                .put(&key, Arc::new(MatrixState::new(partition)));
            tracing::debug!("Allocated {:?} state '{}'", state.scope, state.name);
        }
        Ok(())
    }
}

/// Instance 0 loads, then every instance crosses the prologue barrier, runs the
/// unit and crosses the epilogue barrier.
async fn run_instance(data: Arc<DataManager>, unit: UnitFn, ctx: InstanceContext) -> Result<()> {
    if ctx.is_leader() {
        data.load_files_into_dht().await?;
    }
    data.global_sync(&ctx, 0).await?;

    unit(ctx.clone()).await.map_err(Error::Callback)?;

    data.global_sync(&ctx, 0).await
}
