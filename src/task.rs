//! Partition tasks: frozen units of schedulable work.
//!
//! A task is built by a [`PartitionTaskBuilder`], which accumulates an
//! instruction pipeline over some input partitions together with a rolling
//! resource request and per-output partial metadata. Freezing the builder
//! produces either a [`SingleOutputPartitionTask`] or a
//! [`MultiOutputPartitionTask`] (for fan-outs); a frozen task can never
//! grow another instruction — the finalizers consume the builder.
//!
//! The executor reports back through [`set_result`]: installing a result is
//! a one-shot operation (a second install aborts), after which the read
//! accessors become available. Task ids come from a process-wide atomic
//! counter, so no two tasks in one process lifetime share an id.
//!
//! [`set_result`]: SingleOutputPartitionTask::set_result

use crate::instruction::Instruction;
use crate::partition::{PartialPartitionMetadata, PartitionMetadata, PartitionRef};
use crate::resources::ResourceRequest;
use crate::table::Table;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide task id source. The only shared mutable state in the core.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Capability over a completed task's output partition, regardless of
/// whether execution was local or remote.
pub trait MaterializedResult<P: PartitionRef>: Send + Sync {
    /// The partition handle of this result.
    fn partition(&self) -> P;

    /// The materialized table behind the handle.
    fn vpartition(&self) -> Arc<Table>;

    fn metadata(&self) -> PartitionMetadata;

    /// Best-effort cancellation; a no-op for in-process execution.
    fn cancel(&self);
}

pub type MaterializedResultBox<P> = Box<dyn MaterializedResult<P>>;

/// The frozen description shared by both task flavors: inputs, pipeline,
/// aggregate resource request, and the declared output count.
pub struct PartitionTask<P: PartitionRef> {
    id: u64,
    inputs: Vec<P>,
    instructions: Arc<Vec<Instruction>>,
    resource_request: ResourceRequest,
    num_results: usize,
}

impl<P: PartitionRef> PartitionTask<P> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn inputs(&self) -> &[P] {
        &self.inputs
    }

    pub fn instructions(&self) -> &Arc<Vec<Instruction>> {
        &self.instructions
    }

    pub fn resource_request(&self) -> ResourceRequest {
        self.resource_request
    }

    pub fn num_results(&self) -> usize {
        self.num_results
    }
}

impl<P: PartitionRef> fmt::Debug for PartitionTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.instructions.iter().map(Instruction::name).collect();
        f.debug_struct("PartitionTask")
            .field("id", &self.id)
            .field("num_inputs", &self.inputs.len())
            .field("instructions", &names)
            .field("resource_request", &self.resource_request)
            .field("num_results", &self.num_results)
            .finish()
    }
}

/// Accumulates an instruction pipeline before freezing it into a task.
pub struct PartitionTaskBuilder<P: PartitionRef> {
    inputs: Vec<P>,
    partial_metadatas: Vec<PartialPartitionMetadata>,
    resource_request: ResourceRequest,
    instructions: Vec<Instruction>,
}

impl<P: PartitionRef> PartitionTaskBuilder<P> {
    /// Start a pipeline over `inputs`. When `partial_metadatas` is absent,
    /// one all-unknown entry per input is assumed.
    pub fn new(inputs: Vec<P>, partial_metadatas: Option<Vec<PartialPartitionMetadata>>) -> Self {
        let partial_metadatas = partial_metadatas
            .unwrap_or_else(|| vec![PartialPartitionMetadata::unknown(); inputs.len()]);
        Self {
            inputs,
            partial_metadatas,
            resource_request: ResourceRequest::default(),
            instructions: Vec::new(),
        }
    }

    /// Append an instruction, fold its metadata rule into the rolling
    /// partial metadata, and max its resource request into the pipeline's.
    #[must_use]
    pub fn add_instruction(
        mut self,
        instruction: Instruction,
        resource_request: ResourceRequest,
    ) -> Self {
        self.partial_metadatas = instruction.propagate(&self.partial_metadatas);
        self.resource_request = ResourceRequest::max_of(self.resource_request, resource_request);
        self.instructions.push(instruction);
        self
    }

    /// Current metadata of the pipeline's logical outputs.
    pub fn partial_metadatas(&self) -> &[PartialPartitionMetadata] {
        &self.partial_metadatas
    }

    pub fn resource_request(&self) -> ResourceRequest {
        self.resource_request
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Freeze into a single-output task.
    ///
    /// Applies the freeze-time defaults: `num_cpus` falls back to 1.0, and
    /// a zero `memory_bytes` request is treated as unspecified (some
    /// executors reject an explicit 0).
    pub fn finalize_single_output(self) -> SingleOutputPartitionTask<P> {
        let rr = self.resource_request;
        let resource_request = ResourceRequest::new(
            rr.num_cpus.or(Some(1.0)),
            rr.num_gpus,
            rr.memory_bytes.filter(|&b| b != 0),
        );
        SingleOutputPartitionTask {
            task: Arc::new(PartitionTask {
                id: next_task_id(),
                inputs: self.inputs,
                instructions: Arc::new(self.instructions),
                resource_request,
                num_results: 1,
            }),
            result: Arc::new(Mutex::new(None)),
        }
    }

    /// Freeze into a task producing `num_results` partitions (a fan-out).
    ///
    /// Applies the CPU default but passes `memory_bytes` through verbatim,
    /// zero included.
    pub fn finalize_multi_output(self, num_results: usize) -> MultiOutputPartitionTask<P> {
        let rr = self.resource_request;
        let resource_request =
            ResourceRequest::new(rr.num_cpus.or(Some(1.0)), rr.num_gpus, rr.memory_bytes);
        MultiOutputPartitionTask {
            task: Arc::new(PartitionTask {
                id: next_task_id(),
                inputs: self.inputs,
                instructions: Arc::new(self.instructions),
                resource_request,
                num_results,
            }),
            results: Arc::new(Mutex::new(None)),
        }
    }
}

impl<P: PartitionRef> fmt::Debug for PartitionTaskBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.instructions.iter().map(Instruction::name).collect();
        f.debug_struct("PartitionTaskBuilder")
            .field("num_inputs", &self.inputs.len())
            .field("instructions", &names)
            .field("resource_request", &self.resource_request)
            .finish()
    }
}

/// A frozen task producing exactly one partition. Clones share the result
/// cell, so the schedule and the in-flight construction observe the same
/// completion.
pub struct SingleOutputPartitionTask<P: PartitionRef> {
    task: Arc<PartitionTask<P>>,
    result: Arc<Mutex<Option<MaterializedResultBox<P>>>>,
}

impl<P: PartitionRef> Clone for SingleOutputPartitionTask<P> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            result: Arc::clone(&self.result),
        }
    }
}

impl<P: PartitionRef> SingleOutputPartitionTask<P> {
    pub fn task(&self) -> &PartitionTask<P> {
        &self.task
    }

    /// Install the executor's result. Aborts on a second install or a
    /// result list whose length is not 1.
    pub fn set_result(&self, result: Vec<MaterializedResultBox<P>>) {
        assert_eq!(
            result.len(),
            1,
            "single-output task {} got {} results",
            self.task.id,
            result.len()
        );
        let mut slot = self.result.lock().unwrap();
        assert!(
            slot.is_none(),
            "cannot set result of task {} twice",
            self.task.id
        );
        *slot = result.into_iter().next();
    }

    /// Whether the result partition is available.
    pub fn done(&self) -> bool {
        self.result.lock().unwrap().is_some()
    }

    /// Forward cancellation to the installed result, if any.
    pub fn cancel(&self) {
        if let Some(r) = self.result.lock().unwrap().as_ref() {
            r.cancel();
        }
    }

    /// The result partition. Requires a materialized task.
    pub fn partition(&self) -> P {
        let slot = self.result.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))
            .partition()
    }

    /// Metadata of the result partition, without necessarily retrieving
    /// the partition itself.
    pub fn partition_metadata(&self) -> PartitionMetadata {
        let slot = self.result.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))
            .metadata()
    }

    /// The materialized table of the result.
    pub fn vpartition(&self) -> Arc<Table> {
        let slot = self.result.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))
            .vpartition()
    }
}

impl<P: PartitionRef> fmt::Debug for SingleOutputPartitionTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleOutputPartitionTask")
            .field("task", &self.task)
            .field("done", &self.done())
            .finish()
    }
}

/// A frozen task producing `num_results` partitions, keyed by output index.
pub struct MultiOutputPartitionTask<P: PartitionRef> {
    task: Arc<PartitionTask<P>>,
    results: Arc<Mutex<Option<Vec<MaterializedResultBox<P>>>>>,
}

impl<P: PartitionRef> Clone for MultiOutputPartitionTask<P> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            results: Arc::clone(&self.results),
        }
    }
}

impl<P: PartitionRef> MultiOutputPartitionTask<P> {
    pub fn task(&self) -> &PartitionTask<P> {
        &self.task
    }

    /// Install the executor's results. Aborts on a second install or a
    /// result list whose length differs from `num_results`.
    pub fn set_result(&self, result: Vec<MaterializedResultBox<P>>) {
        assert_eq!(
            result.len(),
            self.task.num_results,
            "multi-output task {} expected {} results, got {}",
            self.task.id,
            self.task.num_results,
            result.len()
        );
        let mut slot = self.results.lock().unwrap();
        assert!(
            slot.is_none(),
            "cannot set result of task {} twice",
            self.task.id
        );
        *slot = Some(result);
    }

    pub fn done(&self) -> bool {
        self.results.lock().unwrap().is_some()
    }

    pub fn cancel(&self) {
        if let Some(results) = self.results.lock().unwrap().as_ref() {
            for r in results {
                r.cancel();
            }
        }
    }

    /// The result partitions, in output-index order.
    pub fn partitions(&self) -> Vec<P> {
        let slot = self.results.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))
            .iter()
            .map(|r| r.partition())
            .collect()
    }

    pub fn partition_metadatas(&self) -> Vec<PartitionMetadata> {
        let slot = self.results.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))
            .iter()
            .map(|r| r.metadata())
            .collect()
    }

    /// The materialized table at output `index`.
    pub fn vpartition(&self, index: usize) -> Arc<Table> {
        let slot = self.results.lock().unwrap();
        slot.as_ref()
            .unwrap_or_else(|| panic!("task {} is not materialized yet", self.task.id))[index]
            .vpartition()
    }
}

impl<P: PartitionRef> fmt::Debug for MultiOutputPartitionTask<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiOutputPartitionTask")
            .field("task", &self.task)
            .field("done", &self.done())
            .finish()
    }
}
