//! The dynamic schedule: a lazy producer of schedulable constructions.
//!
//! [`schedule_logical_node`] lowers an optimized [`LogicalPlan`] into a tree
//! of per-operator state machines. Polling a machine yields a [`Tick`]:
//!
//! - `Open(builder)` — a pipeline still under construction, flowing upward.
//!   Pipelining operators (project, filter, map-partition, write) append
//!   their instruction and re-yield it; only a consumer that needs the
//!   partition freezes it.
//! - `Dispatch(construction)` — frozen work that must be executed. These
//!   pass through parent operators untouched.
//! - `Waiting` — the machine cannot decide its next construction until an
//!   in-flight task completes. Only meaningful to parallel runners; a
//!   sequential runner never observes it at the root.
//! - `Done` — the machine will never produce anything again.
//!
//! The [`Materialize`] adapter wraps the root machine, freezes every
//! surviving `Open` into a single-output task recorded in plan order, and
//! exposes the runner-facing iterator plus the finished [`PartitionSet`].
//!
//! Shuffles (repartition, sort, join) materialize their inputs strictly in
//! producer order and gather reduce inputs in that same order, which makes
//! reduce output deterministic for a given plan and input. A sort
//! broadcasts its quantile boundaries: every range fan-out receives the
//! same boundaries partition as its first input.

use crate::expr::{AggOp, ExprList, col};
use crate::instruction::Instruction;
use crate::partition::{PartitionRef, PartitionSet};
use crate::plan::{LogicalPlan, RepartitionScheme, ScanPlan};
use crate::resources::ResourceRequest;
use crate::series::Series;
use crate::table::{DataType, Field, Schema, Table};
use crate::task::{
    MaterializedResultBox, MultiOutputPartitionTask, PartitionTaskBuilder,
    SingleOutputPartitionTask,
};
use anyhow::Result;
use std::sync::Arc;

/// Sampled rows per input partition when planning a sort.
const SORT_SAMPLE_SIZE: usize = 20;

/// One step of a schedule state machine.
pub enum Tick<P: PartitionRef> {
    /// A pipeline under construction; parents may append instructions.
    Open(PartitionTaskBuilder<P>),
    /// Frozen work for the executor.
    Dispatch(Construction<P>),
    /// Blocked on an in-flight completion.
    Waiting,
    /// Exhausted.
    Done,
}

/// A per-operator schedule state machine.
pub trait Schedule<P: PartitionRef> {
    fn poll(&mut self) -> Result<Tick<P>>;
}

/// A frozen task bundled with its completion callback: the unit handed to
/// the executor.
pub struct Construction<P: PartitionRef> {
    task: FrozenTask<P>,
}

enum FrozenTask<P: PartitionRef> {
    Single(SingleOutputPartitionTask<P>),
    Multi(MultiOutputPartitionTask<P>),
}

impl<P: PartitionRef> Construction<P> {
    fn single(task: SingleOutputPartitionTask<P>) -> Self {
        Self {
            task: FrozenTask::Single(task),
        }
    }

    fn multi(task: MultiOutputPartitionTask<P>) -> Self {
        Self {
            task: FrozenTask::Multi(task),
        }
    }

    pub fn task_id(&self) -> u64 {
        match &self.task {
            FrozenTask::Single(t) => t.task().id(),
            FrozenTask::Multi(t) => t.task().id(),
        }
    }

    pub fn inputs(&self) -> &[P] {
        match &self.task {
            FrozenTask::Single(t) => t.task().inputs(),
            FrozenTask::Multi(t) => t.task().inputs(),
        }
    }

    pub fn instructions(&self) -> Arc<Vec<Instruction>> {
        match &self.task {
            FrozenTask::Single(t) => Arc::clone(t.task().instructions()),
            FrozenTask::Multi(t) => Arc::clone(t.task().instructions()),
        }
    }

    pub fn resource_request(&self) -> ResourceRequest {
        match &self.task {
            FrozenTask::Single(t) => t.task().resource_request(),
            FrozenTask::Multi(t) => t.task().resource_request(),
        }
    }

    /// How many partitions the executor must hand back.
    pub fn num_results(&self) -> usize {
        match &self.task {
            FrozenTask::Single(t) => t.task().num_results(),
            FrozenTask::Multi(t) => t.task().num_results(),
        }
    }

    /// Install the executor's results, completing the underlying task.
    /// Must be called from the schedule's coordinator thread.
    pub fn report_completed(&self, results: Vec<MaterializedResultBox<P>>) {
        match &self.task {
            FrozenTask::Single(t) => t.set_result(results),
            FrozenTask::Multi(t) => t.set_result(results),
        }
    }

    /// Forward cancellation to any installed results.
    pub fn cancel(&self) {
        match &self.task {
            FrozenTask::Single(t) => t.cancel(),
            FrozenTask::Multi(t) => t.cancel(),
        }
    }
}

/// Open a fresh pipeline over one materialized upstream task.
fn open_from_single<P: PartitionRef>(task: &SingleOutputPartitionTask<P>) -> PartitionTaskBuilder<P> {
    PartitionTaskBuilder::new(
        vec![task.partition()],
        Some(vec![task.partition_metadata().into()]),
    )
}

/// Pulls a child machine and freezes its `Open`s into single-output tasks,
/// recording them in emission order. The shuffling schedules all consume
/// their child through one of these.
struct Feed<P: PartitionRef> {
    child: Box<dyn Schedule<P>>,
    tasks: Vec<SingleOutputPartitionTask<P>>,
    exhausted: bool,
}

enum FeedTick<P: PartitionRef> {
    Dispatch(Construction<P>),
    Waiting,
    Exhausted,
}

impl<P: PartitionRef> Feed<P> {
    fn new(child: Box<dyn Schedule<P>>) -> Self {
        Self {
            child,
            tasks: Vec::new(),
            exhausted: false,
        }
    }

    fn poll(&mut self) -> Result<FeedTick<P>> {
        if self.exhausted {
            return Ok(FeedTick::Exhausted);
        }
        match self.child.poll()? {
            Tick::Open(builder) => {
                let task = builder.finalize_single_output();
                self.tasks.push(task.clone());
                Ok(FeedTick::Dispatch(Construction::single(task)))
            }
            Tick::Dispatch(c) => Ok(FeedTick::Dispatch(c)),
            Tick::Waiting => Ok(FeedTick::Waiting),
            Tick::Done => {
                self.exhausted = true;
                Ok(FeedTick::Exhausted)
            }
        }
    }

    fn all_done(&self) -> bool {
        self.exhausted && self.tasks.iter().all(SingleOutputPartitionTask::done)
    }
}

/* ---------- Leaf schedules ---------- */

/// Emits one open pipeline per pre-materialized source partition.
struct ScheduleInMemoryScan<P: PartitionRef> {
    partitions: Vec<Arc<Table>>,
    next: usize,
    _marker: std::marker::PhantomData<P>,
}

impl<P: PartitionRef> Schedule<P> for ScheduleInMemoryScan<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        let Some(table) = self.partitions.get(self.next) else {
            return Ok(Tick::Done);
        };
        self.next += 1;
        let partition = P::from_table(Arc::clone(table));
        let meta = partition.metadata().into();
        Ok(Tick::Open(PartitionTaskBuilder::new(
            vec![partition],
            Some(vec![meta]),
        )))
    }
}

/// Emits one open pipeline per scan partition, each starting from a
/// filepaths partition and a `ReadFile` instruction.
struct ScheduleTabularScan<P: PartitionRef> {
    scan: Arc<ScanPlan>,
    next: usize,
    _marker: std::marker::PhantomData<P>,
}

impl<P: PartitionRef> Schedule<P> for ScheduleTabularScan<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        let Some(paths) = self.scan.partition_paths.get(self.next) else {
            return Ok(Tick::Done);
        };
        let partition_id = self.next;
        self.next += 1;

        let filepaths = Table::from_columns(vec![Series::from_utf8("path", paths.clone())])?;
        let partition = P::from_table(Arc::new(filepaths));
        let meta = partition.metadata().into();
        let builder = PartitionTaskBuilder::new(vec![partition], Some(vec![meta])).add_instruction(
            Instruction::ReadFile {
                partition_id,
                index: None,
                scan: Arc::clone(&self.scan),
                file_rows: None,
            },
            ResourceRequest::default(),
        );
        Ok(Tick::Open(builder))
    }
}

/* ---------- Pipelining schedule ---------- */

/// Appends one instruction to every open pipeline flowing up from the
/// child. The factory sees the running output-partition index, which
/// write instructions use to name their files.
struct SchedulePipeline<P: PartitionRef> {
    child: Box<dyn Schedule<P>>,
    make: Box<dyn FnMut(usize) -> Instruction>,
    next_partition_id: usize,
}

impl<P: PartitionRef> SchedulePipeline<P> {
    fn new(child: Box<dyn Schedule<P>>, make: impl FnMut(usize) -> Instruction + 'static) -> Self {
        Self {
            child,
            make: Box::new(make),
            next_partition_id: 0,
        }
    }
}

impl<P: PartitionRef> Schedule<P> for SchedulePipeline<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        match self.child.poll()? {
            Tick::Open(builder) => {
                let instruction = (self.make)(self.next_partition_id);
                self.next_partition_id += 1;
                Ok(Tick::Open(
                    builder.add_instruction(instruction, ResourceRequest::default()),
                ))
            }
            other => Ok(other),
        }
    }
}

/* ---------- Materializing schedules ---------- */

/// Limit across partitions. Each child partition is materialized with a
/// local limit already applied; partitions are then re-emitted in order,
/// clipped against the rows remaining under the global budget.
struct ScheduleGlobalLimit<P: PartitionRef> {
    feed: Feed<P>,
    remaining: usize,
    next_emit: usize,
}

impl<P: PartitionRef> Schedule<P> for ScheduleGlobalLimit<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        if let Some(task) = self.feed.tasks.get(self.next_emit)
            && task.done()
        {
            self.next_emit += 1;
            let rows = task.partition_metadata().num_rows;
            let take = rows.min(self.remaining);
            self.remaining -= take;
            let mut builder = open_from_single(task);
            if take < rows {
                builder = builder.add_instruction(
                    Instruction::LocalLimit { limit: take },
                    ResourceRequest::default(),
                );
            }
            return Ok(Tick::Open(builder));
        }
        match self.feed.poll()? {
            FeedTick::Dispatch(c) => Ok(Tick::Dispatch(c)),
            FeedTick::Waiting => Ok(Tick::Waiting),
            FeedTick::Exhausted => {
                if self.next_emit == self.feed.tasks.len() {
                    Ok(Tick::Done)
                } else {
                    Ok(Tick::Waiting)
                }
            }
        }
    }
}

/// Materializes every child partition, then emits one open pipeline over
/// all of them with a fixed instruction suffix. Used for global
/// aggregation, count finalization, and single-partition sorts.
struct ScheduleGather<P: PartitionRef> {
    feed: Feed<P>,
    instructions: Vec<Instruction>,
    emitted: bool,
}

impl<P: PartitionRef> ScheduleGather<P> {
    fn new(child: Box<dyn Schedule<P>>, instructions: Vec<Instruction>) -> Self {
        Self {
            feed: Feed::new(child),
            instructions,
            emitted: false,
        }
    }
}

impl<P: PartitionRef> Schedule<P> for ScheduleGather<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        if !self.feed.exhausted {
            match self.feed.poll()? {
                FeedTick::Dispatch(c) => return Ok(Tick::Dispatch(c)),
                FeedTick::Waiting => return Ok(Tick::Waiting),
                FeedTick::Exhausted => {}
            }
        }
        if self.emitted {
            return Ok(Tick::Done);
        }
        if !self.feed.all_done() {
            return Ok(Tick::Waiting);
        }
        self.emitted = true;
        let inputs = self
            .feed
            .tasks
            .iter()
            .map(SingleOutputPartitionTask::partition)
            .collect();
        let metas = self
            .feed
            .tasks
            .iter()
            .map(|t| t.partition_metadata().into())
            .collect();
        let mut builder = PartitionTaskBuilder::new(inputs, Some(metas));
        for instruction in self.instructions.clone() {
            builder = builder.add_instruction(instruction, ResourceRequest::default());
        }
        Ok(Tick::Open(builder))
    }
}

/// Repartition: fan each materialized input out into `num_outputs` keyed
/// pieces, then merge piece `k` of every producer into output `k`.
struct ScheduleFanoutReduce<P: PartitionRef> {
    feed: Feed<P>,
    scheme: RepartitionScheme,
    num_outputs: usize,
    fanouts: Vec<MultiOutputPartitionTask<P>>,
    next_fanout: usize,
    next_reduce: usize,
}

impl<P: PartitionRef> ScheduleFanoutReduce<P> {
    fn new(child: Box<dyn Schedule<P>>, scheme: RepartitionScheme, num_outputs: usize) -> Self {
        Self {
            feed: Feed::new(child),
            scheme,
            num_outputs,
            fanouts: Vec::new(),
            next_fanout: 0,
            next_reduce: 0,
        }
    }

    fn fanout_instruction(&self, input_index: usize) -> Instruction {
        match &self.scheme {
            RepartitionScheme::Random { seed } => Instruction::FanoutRandom {
                num_outputs: self.num_outputs,
                // Distinct stream per producer, reproducible per plan.
                seed: seed.wrapping_add(input_index as u64),
            },
            RepartitionScheme::Hash { partition_by } => Instruction::FanoutHash {
                num_outputs: self.num_outputs,
                partition_by: partition_by.clone(),
            },
        }
    }
}

impl<P: PartitionRef> Schedule<P> for ScheduleFanoutReduce<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        if let Some(task) = self.feed.tasks.get(self.next_fanout)
            && task.done()
        {
            let instruction = self.fanout_instruction(self.next_fanout);
            self.next_fanout += 1;
            let task = open_from_single(task)
                .add_instruction(instruction, ResourceRequest::default())
                .finalize_multi_output(self.num_outputs);
            self.fanouts.push(task.clone());
            return Ok(Tick::Dispatch(Construction::multi(task)));
        }
        if !self.feed.exhausted {
            match self.feed.poll()? {
                FeedTick::Dispatch(c) => return Ok(Tick::Dispatch(c)),
                FeedTick::Waiting => return Ok(Tick::Waiting),
                FeedTick::Exhausted => {}
            }
        }
        if self.next_fanout < self.feed.tasks.len() {
            return Ok(Tick::Waiting);
        }
        if self.next_reduce < self.num_outputs {
            if !self.fanouts.iter().all(MultiOutputPartitionTask::done) {
                return Ok(Tick::Waiting);
            }
            let key = self.next_reduce;
            self.next_reduce += 1;
            let builder = reduce_builder(&self.fanouts, key)
                .add_instruction(Instruction::ReduceMerge, ResourceRequest::default());
            return Ok(Tick::Open(builder));
        }
        Ok(Tick::Done)
    }
}

/// Gather piece `key` of every producer, in producer order.
fn reduce_builder<P: PartitionRef>(
    fanouts: &[MultiOutputPartitionTask<P>],
    key: usize,
) -> PartitionTaskBuilder<P> {
    let inputs = fanouts
        .iter()
        .map(|f| f.partitions()[key].clone())
        .collect();
    let metas = fanouts
        .iter()
        .map(|f| f.partition_metadatas()[key].into())
        .collect();
    PartitionTaskBuilder::new(inputs, Some(metas))
}

/// Range-partitioned sort: sample every input, reduce the samples to
/// global quantile boundaries, fan each input out against the broadcast
/// boundaries, then merge-and-sort each key range.
struct ScheduleSort<P: PartitionRef> {
    feed: Feed<P>,
    sort_by: ExprList,
    descending: Vec<bool>,
    num_outputs: usize,
    samples: Vec<SingleOutputPartitionTask<P>>,
    next_sample: usize,
    boundaries: Option<SingleOutputPartitionTask<P>>,
    fanouts: Vec<MultiOutputPartitionTask<P>>,
    next_fanout: usize,
    next_reduce: usize,
}

impl<P: PartitionRef> ScheduleSort<P> {
    fn new(
        child: Box<dyn Schedule<P>>,
        sort_by: ExprList,
        descending: Vec<bool>,
        num_outputs: usize,
    ) -> Self {
        Self {
            feed: Feed::new(child),
            sort_by,
            descending,
            num_outputs,
            samples: Vec::new(),
            next_sample: 0,
            boundaries: None,
            fanouts: Vec::new(),
            next_fanout: 0,
            next_reduce: 0,
        }
    }
}

impl<P: PartitionRef> Schedule<P> for ScheduleSort<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        // Sample inputs as they materialize.
        if let Some(task) = self.feed.tasks.get(self.next_sample)
            && task.done()
        {
            self.next_sample += 1;
            let task = open_from_single(task)
                .add_instruction(
                    Instruction::Sample {
                        sort_by: self.sort_by.clone(),
                        num_samples: SORT_SAMPLE_SIZE,
                    },
                    ResourceRequest::default(),
                )
                .finalize_single_output();
            self.samples.push(task.clone());
            return Ok(Tick::Dispatch(Construction::single(task)));
        }
        if !self.feed.exhausted {
            match self.feed.poll()? {
                FeedTick::Dispatch(c) => return Ok(Tick::Dispatch(c)),
                FeedTick::Waiting => return Ok(Tick::Waiting),
                FeedTick::Exhausted => {}
            }
        }
        if self.next_sample < self.feed.tasks.len() {
            return Ok(Tick::Waiting);
        }

        // All samples in: compute the global boundaries once.
        let Some(boundaries) = &self.boundaries else {
            if !self.samples.iter().all(SingleOutputPartitionTask::done) {
                return Ok(Tick::Waiting);
            }
            let inputs = self
                .samples
                .iter()
                .map(SingleOutputPartitionTask::partition)
                .collect();
            let metas = self
                .samples
                .iter()
                .map(|t| t.partition_metadata().into())
                .collect();
            let task = PartitionTaskBuilder::new(inputs, Some(metas))
                .add_instruction(
                    Instruction::ReduceToQuantiles {
                        num_quantiles: self.num_outputs,
                        sort_by: self.sort_by.clone(),
                        descending: self.descending.clone(),
                    },
                    ResourceRequest::default(),
                )
                .finalize_single_output();
            self.boundaries = Some(task.clone());
            return Ok(Tick::Dispatch(Construction::single(task)));
        };
        if !boundaries.done() {
            return Ok(Tick::Waiting);
        }

        // Fan each input out against the broadcast boundaries.
        if let Some(task) = self.feed.tasks.get(self.next_fanout) {
            self.next_fanout += 1;
            let inputs = vec![boundaries.partition(), task.partition()];
            let metas = vec![
                boundaries.partition_metadata().into(),
                task.partition_metadata().into(),
            ];
            let task = PartitionTaskBuilder::new(inputs, Some(metas))
                .add_instruction(
                    Instruction::FanoutRange {
                        num_outputs: self.num_outputs,
                        sort_by: self.sort_by.clone(),
                        descending: self.descending.clone(),
                    },
                    ResourceRequest::default(),
                )
                .finalize_multi_output(self.num_outputs);
            self.fanouts.push(task.clone());
            return Ok(Tick::Dispatch(Construction::multi(task)));
        }

        // Merge-and-sort each key range.
        if self.next_reduce < self.num_outputs {
            if !self.fanouts.iter().all(MultiOutputPartitionTask::done) {
                return Ok(Tick::Waiting);
            }
            let key = self.next_reduce;
            self.next_reduce += 1;
            let builder = reduce_builder(&self.fanouts, key).add_instruction(
                Instruction::ReduceMergeAndSort {
                    sort_by: self.sort_by.clone(),
                    descending: self.descending.clone(),
                },
                ResourceRequest::default(),
            );
            return Ok(Tick::Open(builder));
        }
        Ok(Tick::Done)
    }
}

/// One side of a join: its feed, its hash fan-outs, and the per-key merged
/// partitions.
struct JoinSide<P: PartitionRef> {
    feed: Feed<P>,
    keys: ExprList,
    fanouts: Vec<MultiOutputPartitionTask<P>>,
    next_fanout: usize,
    merges: Vec<Option<SingleOutputPartitionTask<P>>>,
}

enum SideStep<P: PartitionRef> {
    Emit(Tick<P>),
    Waiting,
    /// Every input is materialized and fanned out.
    Ready,
}

impl<P: PartitionRef> JoinSide<P> {
    fn new(child: Box<dyn Schedule<P>>, keys: ExprList, num_outputs: usize) -> Self {
        Self {
            feed: Feed::new(child),
            keys,
            fanouts: Vec::new(),
            next_fanout: 0,
            merges: (0..num_outputs).map(|_| None).collect(),
        }
    }

    fn step(&mut self, num_outputs: usize) -> Result<SideStep<P>> {
        if let Some(task) = self.feed.tasks.get(self.next_fanout)
            && task.done()
        {
            self.next_fanout += 1;
            let task = open_from_single(task)
                .add_instruction(
                    Instruction::FanoutHash {
                        num_outputs,
                        partition_by: self.keys.clone(),
                    },
                    ResourceRequest::default(),
                )
                .finalize_multi_output(num_outputs);
            self.fanouts.push(task.clone());
            return Ok(SideStep::Emit(Tick::Dispatch(Construction::multi(task))));
        }
        if !self.feed.exhausted {
            match self.feed.poll()? {
                FeedTick::Dispatch(c) => return Ok(SideStep::Emit(Tick::Dispatch(c))),
                FeedTick::Waiting => return Ok(SideStep::Waiting),
                FeedTick::Exhausted => {}
            }
        }
        if self.next_fanout < self.feed.tasks.len() {
            return Ok(SideStep::Waiting);
        }
        Ok(SideStep::Ready)
    }

    fn all_fanouts_done(&self) -> bool {
        self.fanouts.iter().all(MultiOutputPartitionTask::done)
    }

    /// Emit the per-key merge for `key` if it has not been emitted yet.
    fn emit_merge(&mut self, key: usize) -> Option<Construction<P>> {
        if self.merges[key].is_some() {
            return None;
        }
        let task = reduce_builder(&self.fanouts, key)
            .add_instruction(Instruction::ReduceMerge, ResourceRequest::default())
            .finalize_single_output();
        self.merges[key] = Some(task.clone());
        Some(Construction::single(task))
    }
}

/// Hash join: shuffle both sides on their join keys to a common partition
/// count, merge each side per key, then join the co-located pairs.
struct ScheduleJoin<P: PartitionRef> {
    left: JoinSide<P>,
    right: JoinSide<P>,
    output_projection: Option<ExprList>,
    how: crate::table::JoinHow,
    num_outputs: usize,
    next_join: usize,
}

impl<P: PartitionRef> Schedule<P> for ScheduleJoin<P> {
    fn poll(&mut self) -> Result<Tick<P>> {
        let mut waiting = false;
        for side in [&mut self.left, &mut self.right] {
            match side.step(self.num_outputs)? {
                SideStep::Emit(tick) => return Ok(tick),
                SideStep::Waiting => waiting = true,
                SideStep::Ready => {}
            }
        }
        if waiting {
            return Ok(Tick::Waiting);
        }
        if !self.left.all_fanouts_done() || !self.right.all_fanouts_done() {
            return Ok(Tick::Waiting);
        }
        for key in 0..self.num_outputs {
            if let Some(c) = self.left.emit_merge(key) {
                return Ok(Tick::Dispatch(c));
            }
            if let Some(c) = self.right.emit_merge(key) {
                return Ok(Tick::Dispatch(c));
            }
        }
        if self.next_join < self.num_outputs {
            let key = self.next_join;
            let (Some(l), Some(r)) = (&self.left.merges[key], &self.right.merges[key]) else {
                unreachable!("merge tasks exist for every key before joins are emitted");
            };
            if !l.done() || !r.done() {
                return Ok(Tick::Waiting);
            }
            self.next_join += 1;
            let inputs = vec![l.partition(), r.partition()];
            let metas = vec![l.partition_metadata().into(), r.partition_metadata().into()];
            let builder = PartitionTaskBuilder::new(inputs, Some(metas)).add_instruction(
                Instruction::Join {
                    left_on: self.left.keys.to_column_refs(),
                    right_on: self.right.keys.to_column_refs(),
                    output_projection: self.output_projection.clone(),
                    how: self.how,
                },
                ResourceRequest::default(),
            );
            return Ok(Tick::Open(builder));
        }
        Ok(Tick::Done)
    }
}

/* ---------- Factory ---------- */

/// Lower an optimized logical plan into its schedule state machine.
pub fn schedule_logical_node<P: PartitionRef>(plan: &LogicalPlan) -> Box<dyn Schedule<P>> {
    match plan {
        LogicalPlan::InMemoryScan { partitions } => Box::new(ScheduleInMemoryScan {
            partitions: partitions.clone(),
            next: 0,
            _marker: std::marker::PhantomData,
        }),
        LogicalPlan::TabularScan { scan } => Box::new(ScheduleTabularScan {
            scan: Arc::clone(scan),
            next: 0,
            _marker: std::marker::PhantomData,
        }),
        LogicalPlan::Project { input, projection } => {
            let projection = projection.clone();
            Box::new(SchedulePipeline::new(
                schedule_logical_node(input),
                move |_| Instruction::Project {
                    projection: projection.clone(),
                },
            ))
        }
        LogicalPlan::Filter { input, predicate } => {
            let predicate = predicate.clone();
            Box::new(SchedulePipeline::new(
                schedule_logical_node(input),
                move |_| Instruction::Filter {
                    predicate: predicate.clone(),
                },
            ))
        }
        LogicalPlan::MapPartition { input, mapper } => {
            let mapper = Arc::clone(mapper);
            Box::new(SchedulePipeline::new(
                schedule_logical_node(input),
                move |_| Instruction::MapPartition {
                    mapper: Arc::clone(&mapper),
                },
            ))
        }
        LogicalPlan::Write { input, write } => {
            let write = Arc::clone(write);
            Box::new(SchedulePipeline::new(
                schedule_logical_node(input),
                move |partition_id| Instruction::WriteFile {
                    partition_id,
                    write: Arc::clone(&write),
                },
            ))
        }
        LogicalPlan::GlobalLimit { input, limit } => {
            let limit = *limit;
            let limited = SchedulePipeline::new(schedule_logical_node(input), move |_| {
                Instruction::LocalLimit { limit }
            });
            Box::new(ScheduleGlobalLimit {
                feed: Feed::new(Box::new(limited)),
                remaining: limit,
                next_emit: 0,
            })
        }
        LogicalPlan::Repartition {
            input,
            num_partitions,
            scheme,
        } => Box::new(ScheduleFanoutReduce::new(
            schedule_logical_node(input),
            scheme.clone(),
            *num_partitions,
        )),
        LogicalPlan::Sort {
            input,
            sort_by,
            descending,
        } => {
            let num_outputs = input.num_partitions();
            if num_outputs == 1 {
                // One partition sorts locally; no quantile protocol needed.
                return Box::new(ScheduleGather::new(
                    schedule_logical_node(input),
                    vec![Instruction::ReduceMergeAndSort {
                        sort_by: sort_by.clone(),
                        descending: descending.clone(),
                    }],
                ));
            }
            Box::new(ScheduleSort::new(
                schedule_logical_node(input),
                sort_by.clone(),
                descending.clone(),
                num_outputs,
            ))
        }
        LogicalPlan::Aggregate {
            input,
            to_agg,
            group_by,
        } => match group_by {
            // Grouped: co-locate groups by hash, then aggregate each
            // shuffled partition independently.
            Some(keys) => {
                let shuffled = ScheduleFanoutReduce::new(
                    schedule_logical_node(input),
                    RepartitionScheme::Hash {
                        partition_by: keys.clone(),
                    },
                    input.num_partitions(),
                );
                let to_agg = to_agg.clone();
                let group_by = group_by.clone();
                Box::new(SchedulePipeline::new(Box::new(shuffled), move |_| {
                    Instruction::Aggregate {
                        to_agg: to_agg.clone(),
                        group_by: group_by.clone(),
                    }
                }))
            }
            // Global: gather everything and aggregate once.
            None => Box::new(ScheduleGather::new(
                schedule_logical_node(input),
                vec![
                    Instruction::ReduceMerge,
                    Instruction::Aggregate {
                        to_agg: to_agg.clone(),
                        group_by: None,
                    },
                ],
            )),
        },
        LogicalPlan::Count { input } => {
            let schema = Schema::new(vec![Field::new("count", DataType::Int64)]);
            let counted = SchedulePipeline::new(schedule_logical_node(input), move |_| {
                Instruction::LocalCount {
                    schema: schema.clone(),
                }
            });
            Box::new(ScheduleGather::new(
                Box::new(counted),
                vec![
                    Instruction::ReduceMerge,
                    Instruction::Aggregate {
                        to_agg: vec![(col("count"), AggOp::Sum)],
                        group_by: None,
                    },
                ],
            ))
        }
        LogicalPlan::Join {
            left,
            right,
            left_on,
            right_on,
            output_projection,
            how,
        } => {
            let num_outputs = plan.num_partitions();
            Box::new(ScheduleJoin {
                left: JoinSide::new(schedule_logical_node(left), left_on.clone(), num_outputs),
                right: JoinSide::new(schedule_logical_node(right), right_on.clone(), num_outputs),
                output_projection: output_projection.clone(),
                how: *how,
                num_outputs,
                next_join: 0,
            })
        }
    }
}

/* ---------- Root adapter ---------- */

/// What the runner sees when it asks the schedule for work.
pub enum MaterializePoll<P: PartitionRef> {
    /// A construction ready for the executor.
    Ready(Construction<P>),
    /// Nothing to hand out until an in-flight completion lands. Fatal in
    /// a sequential runner.
    Pending,
    /// No further constructions will ever be produced.
    Exhausted,
}

/// Root adapter: freezes every surviving open pipeline into a result task
/// and enumerates the root node's partitions.
pub struct Materialize<P: PartitionRef> {
    inner: Box<dyn Schedule<P>>,
    tasks: Vec<SingleOutputPartitionTask<P>>,
    exhausted: bool,
}

impl<P: PartitionRef> Materialize<P> {
    pub fn from_plan(plan: &LogicalPlan) -> Self {
        Self::new(schedule_logical_node(plan))
    }

    pub fn new(inner: Box<dyn Schedule<P>>) -> Self {
        Self {
            inner,
            tasks: Vec::new(),
            exhausted: false,
        }
    }

    /// Pull the next construction, if any is ready.
    pub fn next_construction(&mut self) -> Result<MaterializePoll<P>> {
        if self.exhausted {
            return Ok(MaterializePoll::Exhausted);
        }
        match self.inner.poll()? {
            Tick::Open(builder) => {
                let task = builder.finalize_single_output();
                self.tasks.push(task.clone());
                Ok(MaterializePoll::Ready(Construction::single(task)))
            }
            Tick::Dispatch(c) => Ok(MaterializePoll::Ready(c)),
            Tick::Waiting => Ok(MaterializePoll::Pending),
            Tick::Done => {
                self.exhausted = true;
                Ok(MaterializePoll::Exhausted)
            }
        }
    }

    /// True once the schedule is exhausted and every result partition is
    /// materialized.
    pub fn is_complete(&self) -> bool {
        self.exhausted && self.tasks.iter().all(SingleOutputPartitionTask::done)
    }

    /// The root's partitions, in plan order. Requires [`Self::is_complete`].
    pub fn result_partition_set(&self) -> PartitionSet<P> {
        assert!(
            self.is_complete(),
            "result partitions requested before the schedule completed"
        );
        PartitionSet::new(
            self.tasks
                .iter()
                .map(SingleOutputPartitionTask::partition)
                .collect(),
        )
    }

    /// Forward cancellation to every materialized result task.
    pub fn cancel(&self) {
        for task in &self.tasks {
            task.cancel();
        }
    }
}
