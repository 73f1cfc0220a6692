//! Program Model Tests
//!
//! ## Test Scopes
//! - **Declarations**: state builder defaults, validation and placement.
//! - **Runs**: linking, loading and running units across a cluster.

#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeId;
    use crate::directory::DistributionMode;
    use crate::error::Error;
    use crate::matrix::{MatrixFormat, MatrixState};
    use crate::program::{PartitionStrategy, Program, ProgramRunner, Scope, StateBuilder};
    use crate::testing::cluster;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    // ============================================================
    // TEST 1: Declarations
    // ============================================================

    #[test]
    fn test_state_builder_defaults() {
        let state = StateBuilder::new("w", 4, 2).build().unwrap();

        assert_eq!(state.scope, Scope::Replicated);
        assert_eq!(state.strategy, PartitionStrategy::Row);
        assert_eq!(state.format, MatrixFormat::Dense);
        assert!(state.path.is_none());
        assert!(state.allocated_on(NodeId(3)));
    }

    #[test]
    fn test_state_placement() {
        let singleton = StateBuilder::new("s", 1, 1)
            .scope(Scope::Singleton)
            .at(&[NodeId(1)])
            .build()
            .unwrap();
        let replicas = StateBuilder::new("r", 1, 1)
            .at(&[NodeId(2), NodeId(3)])
            .build()
            .unwrap();

        assert!(singleton.allocated_on(NodeId(1)));
        assert!(!singleton.allocated_on(NodeId(0)));
        assert!(!replicas.allocated_on(NodeId(1)));
        assert!(replicas.allocated_on(NodeId(3)));
    }

    #[test]
    fn test_state_partitioner_follows_scope() {
        let rows = StateBuilder::new("p", 9, 4).partitioned_by(PartitionStrategy::Row).build().unwrap();
        let cols = StateBuilder::new("c", 9, 4).partitioned_by(PartitionStrategy::Column).build().unwrap();
        let replicated = StateBuilder::new("r", 9, 4).build().unwrap();

        assert_eq!(rows.partitioner(NodeId(1), 3).unwrap().partition_shape().row_offset, 3);
        assert_eq!(cols.partitioner(NodeId(1), 2).unwrap().partition_shape().col_offset, 2);
        assert!(!replicated.partitioner(NodeId(1), 3).unwrap().is_partitioned());
    }

    #[test]
    fn test_invalid_declarations() {
        let empty = StateBuilder::new("e", 0, 3).build();
        let file_singleton = StateBuilder::new("f", 2, 2)
            .scope(Scope::Singleton)
            .path("/tmp/in.csv")
            .build();

        assert!(matches!(empty, Err(Error::Precondition(_))));
        assert!(matches!(file_singleton, Err(Error::Precondition(_))));
    }

    #[test]
    fn test_job_uid_is_shared_and_per_run() {
        assert_eq!(ProgramRunner::job_uid("pagerank", 1), ProgramRunner::job_uid("pagerank", 1));
        assert_ne!(ProgramRunner::job_uid("pagerank", 1), ProgramRunner::job_uid("pagerank", 2));
    }

    // ============================================================
    // TEST 2: Runs
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_program_loads_then_runs_every_instance() {
        // ARRANGE: 6 rows on 3 nodes, two instances per node
        let nodes = cluster(3).await;
        let path = std::env::temp_dir().join(format!("pserver-{}.csv", Uuid::new_v4()));
        std::fs::write(&path, "1 2\n3 4\n5 6\n7 8\n9 10\n11 12\n").unwrap();

        let instances = Arc::new(AtomicUsize::new(0));
        let totals = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut programs = Vec::new();
        for node in &nodes {
            let data = node.data().clone();
            let aggregator = Arc::new(data.aggregator::<f64>("total"));
            let instances = instances.clone();
            let totals = totals.clone();

            let program = Program::new("sum", move |ctx| {
                let data = data.clone();
                let aggregator = aggregator.clone();
                let instances = instances.clone();
                let totals = totals.clone();
                async move {
                    instances.fetch_add(1, Ordering::SeqCst);
                    if ctx.is_leader() {
                        let local = data.get_object::<MatrixState>("x")?;
                        let sum: f64 = local.read().entries().iter().map(|e| e.value).sum();
                        let total = aggregator
                            .apply(sum, |partials| Ok(partials.iter().sum::<f64>()))
                            .await?;
                        totals.lock().push(total);
                    }
                    data.global_sync(&ctx, 0).await?;
                    Ok(())
                }
            })
            .parallelism(2)
            .state(
                StateBuilder::new("x", 6, 2)
                    .partitioned_by(PartitionStrategy::Row)
                    .path(&path)
                    .record_format(crate::sync::RecordFormat::Row)
                    .build()
                    .unwrap(),
            )
            .state(StateBuilder::new("model", 1, 2).build().unwrap());
            programs.push(program);
        }

        // ACT
        let mut runs = Vec::new();
        for (node, program) in nodes.iter().zip(programs) {
            let node = node.clone();
            runs.push(tokio::spawn(async move { node.run(&program).await }));
        }
        let mut job_uids = Vec::new();
        for run in runs {
            job_uids.push(run.await.unwrap().unwrap());
        }

        // ASSERT
        assert_eq!(instances.load(Ordering::SeqCst), 6);
        assert_eq!(*totals.lock(), vec![78.0, 78.0, 78.0]);
        assert!(job_uids.iter().all(|uid| *uid == job_uids[0]));
        for node in &nodes {
            assert!(node.data().get_job(&job_uids[0]).is_none());
            assert_eq!(node.directory().resolve("x").unwrap().mode, DistributionMode::Distributed);
            assert_eq!(node.directory().resolve("model").unwrap().mode, DistributionMode::Local);
        }
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_singleton_is_allocated_on_owner_only() {
        let nodes = cluster(2).await;

        let program = Program::new("noop", |_| async { Ok(()) })
            .state(StateBuilder::new("s", 2, 2).scope(Scope::Singleton).build().unwrap());

        let (first, second) = tokio::join!(nodes[0].run(&program), nodes[1].run(&program));
        first.unwrap();
        second.unwrap();

        assert!(nodes[0].data().get_object::<MatrixState>("s").is_ok());
        assert!(nodes[1].data().get_object::<MatrixState>("s").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unit_failure_is_reported() {
        let nodes = cluster(1).await;
        let program = Program::new("failing", |_| async { anyhow::bail!("diverged") });

        let result = nodes[0].run(&program).await;

        assert!(matches!(result, Err(Error::Callback(_))));
        assert_eq!(nodes[0].data().job_count(), 0);
    }
}
