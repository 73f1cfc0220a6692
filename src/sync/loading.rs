//! Partitioned file loading.
//!
//! Every node streams its split of each registered file. Entries owned locally are
//! written straight into the partition buffer, foreign entries are batched per
//! owner. Replicated entries are kept and also sent to every peer. Once a node has
//! flushed everything it sends a finish signal for the file; when all nodes,
//! itself included, have finished a file, the buffer is published in the directory.

use super::filesystem::{FileSystemManager, RecordFormat};
use super::latch::CountDownLatch;
use super::types::{FINISHED_LOADING_FILE_EVENT, MATRIX_ENTRY_PARTITION_EVENT};
use crate::cluster::registry::ClusterRegistry;
use crate::cluster::types::NodeId;
use crate::config::SyncConfig;
use crate::directory::{Directory, DirectoryKey, DistributionMode, PartitionDescriptor};
use crate::error::{Error, Result};
use crate::matrix::{MatrixFormat, MatrixLayout, MatrixPartition, MatrixState};
use crate::partition::{MatrixEntry, MatrixPartitioner, MutableMatrixEntry, PartitionShape};
use crate::transport::{ListenerId, Message, NetEvent, Transport};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A file to load into the matrix state object `name`.
#[derive(Debug, Clone)]
pub struct LoadTask {
    pub name: String,
    pub path: PathBuf,
    pub format: RecordFormat,
    pub matrix_format: MatrixFormat,
    pub layout: MatrixLayout,
    pub partitioner: Arc<dyn MatrixPartitioner>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixEntryPartition {
    name: String,
    entries: Vec<MatrixEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FinishedLoadingFile {
    name: String,
}

struct FileProgress {
    finishes: CountDownLatch,
    published: CountDownLatch,
}

#[derive(Default)]
struct LoaderState {
    tasks: Vec<LoadTask>,
    buffers: HashMap<String, Arc<MatrixState>>,
    /// Entries that arrived before the local node registered the task.
    pending: HashMap<String, Vec<MatrixEntry>>,
    progress: HashMap<String, Arc<FileProgress>>,
}

pub(crate) struct Loader {
    transport: Arc<Transport>,
    directory: Arc<Directory>,
    fs: Arc<dyn FileSystemManager>,
    config: SyncConfig,
    state: parking_lot::Mutex<LoaderState>,
    failure: parking_lot::Mutex<Option<Error>>,
    listeners: parking_lot::Mutex<Vec<(&'static str, ListenerId)>>,
}

impl Loader {
    pub(crate) fn new(
        transport: Arc<Transport>,
        directory: Arc<Directory>,
        fs: Arc<dyn FileSystemManager>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let loader = Arc::new(Self {
            transport: transport.clone(),
            directory,
            fs,
            config,
            state: parking_lot::Mutex::new(LoaderState::default()),
            failure: parking_lot::Mutex::new(None),
            listeners: parking_lot::Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&loader);
        let entries_listener = transport.add_listener(MATRIX_ENTRY_PARTITION_EVENT, move |event: NetEvent| {
            let weak: Weak<Loader> = weak.clone();
            async move {
                let Some(loader) = weak.upgrade() else {
                    return Ok(());
                };
                let batch: MatrixEntryPartition = event.decode()?;
                loader.record(loader.accept_entries(&batch.name, batch.entries))?;
                Ok(())
            }
        });

        let weak = Arc::downgrade(&loader);
        let finished_listener = transport.add_listener(FINISHED_LOADING_FILE_EVENT, move |event: NetEvent| {
            let weak: Weak<Loader> = weak.clone();
            async move {
                let Some(loader) = weak.upgrade() else {
                    return Ok(());
                };
                let finished: FinishedLoadingFile = event.decode()?;
                loader.record(loader.node_finished(&finished.name, event.src_node))?;
                Ok(())
            }
        });

        loader.listeners.lock().extend([
            (MATRIX_ENTRY_PARTITION_EVENT, entries_listener),
            (FINISHED_LOADING_FILE_EVENT, finished_listener),
        ]);
        loader
    }

    fn registry(&self) -> &ClusterRegistry {
        self.transport.registry()
    }

    /// Keeps the first failure seen on a reader task so the loading call can report it.
    fn record(&self, outcome: Result<()>) -> Result<()> {
        if let Err(e) = outcome {
            let message = e.to_string();
            self.failure.lock().get_or_insert(e);
            return Err(Error::Protocol(message));
        }
        Ok(())
    }

    fn progress_of(state: &mut LoaderState, name: &str, nodes: usize) -> Arc<FileProgress> {
        state
            .progress
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(FileProgress {
                    finishes: CountDownLatch::new(nodes),
                    published: CountDownLatch::new(1),
                })
            })
            .clone()
    }

    pub(crate) fn register_task(&self, task: LoadTask) -> Result<()> {
        if task.partitioner.num_nodes() != self.registry().num_nodes() {
            return Err(Error::Precondition(format!(
                "partitioner of '{}' spans {} nodes, the cluster has {}",
                task.name,
                task.partitioner.num_nodes(),
                self.registry().num_nodes()
            )));
        }

        let nodes = self.registry().num_nodes();
        let mut state = self.state.lock();
        if state.buffers.contains_key(&task.name) {
            return Err(Error::Precondition(format!(
                "'{}' is already being loaded",
                task.name
            )));
        }

        let mut buffer = MatrixPartition::new(
            task.partitioner.partition_shape(),
            task.matrix_format,
            task.layout,
        )?;
        for entry in state.pending.remove(&task.name).unwrap_or_default() {
            buffer.set(entry.row, entry.col, entry.value)?;
        }

        self.fs.register_file(&task.path, task.format)?;
        Self::progress_of(&mut state, &task.name, nodes);
        state
            .buffers
            .insert(task.name.clone(), Arc::new(MatrixState::new(buffer)));
        debug!("Registered load task '{}' from {}", task.name, task.path.display());
        state.tasks.push(task);
        Ok(())
    }

    fn accept_entries(&self, name: &str, entries: Vec<MatrixEntry>) -> Result<()> {
        let buffer = {
            let mut state = self.state.lock();
            match state.buffers.get(name) {
                Some(buffer) => buffer.clone(),
                None => {
                    state.pending.entry(name.to_string()).or_default().extend(entries);
                    return Ok(());
                }
            }
        };

        let mut partition = buffer.write();
        for entry in entries {
            partition.set(entry.row, entry.col, entry.value)?;
        }
        Ok(())
    }

    fn node_finished(&self, name: &str, node: NodeId) -> Result<()> {
        let progress = {
            let mut state = self.state.lock();
            Self::progress_of(&mut state, name, self.registry().num_nodes())
        };

        match progress.finishes.count_down() {
            Some(0) => {
                debug!("Node {} finished '{}', publishing", node, name);
                let outcome = self.record(self.publish(name));
                // Waiters are released either way; a failure is in `self.failure`
                progress.published.count_down();
                outcome
            }
            Some(left) => {
                debug!("Node {} finished '{}', {} nodes left", node, name, left);
                Ok(())
            }
            None => Err(Error::Protocol(format!(
                "node {} finished '{}' after loading completed",
                node, name
            ))),
        }
    }

    fn publish(&self, name: &str) -> Result<()> {
        let (task, buffer) = {
            let state = self.state.lock();
            let task = state.tasks.iter().find(|task| task.name == name).cloned();
            (task, state.buffers.get(name).cloned())
        };
        let (Some(task), Some(buffer)) = (task, buffer) else {
            return Err(Error::Protocol(format!(
                "'{}' completed without a local load task",
                name
            )));
        };

        let key = announce_partitions(
            &self.directory,
            self.registry(),
            name,
            task.partitioner.as_ref(),
            self.config.segment_rows,
        )?;
        self.directory.put(&key, buffer);
        Ok(())
    }

    pub(crate) async fn load_files_into_dht(&self) -> Result<()> {
        let tasks = self.state.lock().tasks.clone();
        if tasks.is_empty() {
            return Ok(());
        }

        self.fs.compute_input_splits_for_registered_files()?;
        for task in &tasks {
            if let Err(e) = self.stream_task(task) {
                self.clear(&tasks);
                return Err(self.failure.lock().take().unwrap_or(e));
            }
        }

        for task in &tasks {
            let progress = {
                let mut state = self.state.lock();
                Self::progress_of(&mut state, &task.name, self.registry().num_nodes())
            };
            let waited = progress
                .published
                .wait_timeout(self.config.sync_timeout(), &format!("loading of '{}'", task.name))
                .await;

            if let Some(e) = self.failure.lock().take() {
                self.clear(&tasks);
                return Err(e);
            }
            if let Err(e) = waited {
                self.clear(&tasks);
                return Err(e);
            }
        }

        self.clear(&tasks);
        info!("Loaded {} files into the directory", tasks.len());
        Ok(())
    }

    fn clear(&self, tasks: &[LoadTask]) {
        let mut state = self.state.lock();
        for task in tasks {
            state.buffers.remove(&task.name);
            state.progress.remove(&task.name);
        }
        state.tasks.retain(|task| !tasks.iter().any(|done| done.name == task.name));
    }

    fn stream_task(&self, task: &LoadTask) -> Result<()> {
        let local = self.registry().local_node_id();
        let remotes = self.registry().remote_node_ids();
        let rows = task.partitioner.global_rows();
        let cols = task.partitioner.global_cols();
        let buffer = self
            .state
            .lock()
            .buffers
            .get(&task.name)
            .cloned()
            .ok_or_else(|| Error::UnknownName(task.name.clone()))?;

        let mut batches: HashMap<NodeId, Vec<MatrixEntry>> = HashMap::new();
        let mut entry = MutableMatrixEntry::default();
        let (mut written, mut forwarded, mut skipped) = (0u64, 0u64, 0u64);

        for record in self.fs.create_file_iterator(&task.path, task.format)? {
            let record = record?;
            for i in 0..record.len() {
                if !record.fill(i, &mut entry) {
                    break;
                }
                if entry.row() >= rows || entry.col() >= cols {
                    skipped += 1;
                    continue;
                }

                match task.partitioner.partition_of_entry(entry.row(), entry.col())? {
                    Some(owner) if owner == local => {
                        self.write_local(task, &buffer, &entry)?;
                        written += 1;
                    }
                    Some(owner) => {
                        forwarded += 1;
                        let batch = batches.entry(owner).or_default();
                        batch.push(entry.freeze());
                        if batch.len() >= self.config.batch_threshold {
                            let full = std::mem::take(batch);
                            self.flush(&task.name, owner, full)?;
                        }
                    }
                    None => {
                        self.write_local(task, &buffer, &entry)?;
                        written += 1;
                        for remote in &remotes {
                            let batch = batches.entry(*remote).or_default();
                            batch.push(entry.freeze());
                            if batch.len() >= self.config.batch_threshold {
                                let full = std::mem::take(batch);
                                self.flush(&task.name, *remote, full)?;
                            }
                        }
                    }
                }
            }
        }

        for (owner, batch) in batches {
            if !batch.is_empty() {
                self.flush(&task.name, owner, batch)?;
            }
        }

        if skipped > 0 {
            warn!(
                "Skipped {} entries of '{}' outside the {}x{} matrix",
                skipped, task.name, rows, cols
            );
        }
        debug!(
            "Streamed '{}': {} entries kept, {} forwarded",
            task.name, written, forwarded
        );

        let finished = FinishedLoadingFile {
            name: task.name.clone(),
        };
        self.transport
            .broadcast(&Message::with_payload(FINISHED_LOADING_FILE_EVENT, &finished)?)?;
        self.node_finished(&task.name, local)
    }

    fn write_local(&self, task: &LoadTask, buffer: &MatrixState, entry: &MutableMatrixEntry) -> Result<()> {
        let row = task.partitioner.global_to_local_row(entry.row())?;
        let col = task.partitioner.global_to_local_col(entry.col())?;
        buffer.write().matrix_mut().set(row, col, entry.value())
    }

    fn flush(&self, name: &str, owner: NodeId, entries: Vec<MatrixEntry>) -> Result<()> {
        let batch = MatrixEntryPartition {
            name: name.to_string(),
            entries,
        };
        self.transport
            .send(owner, &Message::with_payload(MATRIX_ENTRY_PARTITION_EVENT, &batch)?)
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        for (event_type, id) in self.listeners.lock().drain(..) {
            self.transport.remove_listener(event_type, id);
        }
    }
}

/// Registers `name` with the distribution mode its partitioner implies and, for
/// partitioned objects, the partition directory every node derives from it.
///
/// Descriptors are laid out along the partitioned axis: rows, or columns for
/// column-partitioned objects spread over more than one node.
pub(crate) fn announce_partitions(
    directory: &Directory,
    registry: &ClusterRegistry,
    name: &str,
    partitioner: &dyn MatrixPartitioner,
    segment_rows: u64,
) -> Result<DirectoryKey> {
    let mode = if partitioner.is_partitioned() {
        DistributionMode::Distributed
    } else {
        DistributionMode::Local
    };
    let key = directory.resolve_or_register(name, mode);
    if !partitioner.is_partitioned() || !key.partition_directory().is_empty() {
        return Ok(key);
    }

    let mut shapes = partitioner.shapes()?;
    if partitioner.num_col_partitions() > 1 {
        for shape in &mut shapes {
            *shape = PartitionShape::new(shape.cols, shape.rows, shape.col_offset, shape.row_offset);
        }
    }
    let descriptors = PartitionDescriptor::layout(&shapes, registry.machines(), segment_rows)?;
    for (index, descriptor) in descriptors.into_iter().enumerate() {
        directory.add_partition_directory_entry(name, NodeId::new(index), descriptor)?;
    }

    directory
        .resolve(name)
        .ok_or_else(|| Error::UnknownName(name.to_string()))
}
