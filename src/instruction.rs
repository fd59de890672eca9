//! The closed instruction algebra: partition-to-partitions transformations.
//!
//! An [`Instruction`] is one step of a partition-level pipeline. Most take
//! one partition and return one; fan-outs take one and return many; reduces
//! take many and return one. To accommodate all of them, both contracts are
//! typed `Vec<Table> -> Vec<Table>`:
//!
//! - [`Instruction::run`] — the data transformation;
//! - [`Instruction::propagate`] — the compile-time metadata rule, so the
//!   schedule can plan limits and reducer sizing without materializing
//!   anything.
//!
//! The set is closed on purpose: handlers are selected by pattern match,
//! and `match` exhaustiveness keeps the algebra machine-checked. The one
//! open seam is [`MapPartition`](Instruction::MapPartition), whose payload
//! is a caller-supplied [`PartitionMapper`].
//!
//! Arity mismatches at `run` are logic bugs in the schedule, not input
//! errors; they abort with an assertion naming the violation. Data and I/O
//! failures surface as `Err`.

use crate::expr::{AggOp, Expr, ExprList};
use crate::partition::PartialPartitionMetadata;
use crate::plan::{ScanPlan, WritePlan};
use crate::series::Series;
use crate::table::{JoinHow, Schema, Table};
use anyhow::{Context, Result, ensure};
use std::fmt::Debug;
use std::sync::Arc;

/// Empirical footprint of a one-row count partition; stays small.
const COUNT_RESULT_SIZE_BYTES: usize = 104;

/// A caller-supplied per-partition transform, the open extension seam of
/// the algebra.
pub trait PartitionMapper: Send + Sync + Debug {
    fn run(&self, input: &Table) -> Result<Table>;
}

/// One step of a partition pipeline. See the module docs for the two
/// contracts every variant implements.
#[derive(Clone, Debug)]
pub enum Instruction {
    /// Read one scan partition's files. The single input is the filepaths
    /// partition (a one-column `path` table); `index`, when set, restricts
    /// the read to that one file of the partition.
    ReadFile {
        partition_id: usize,
        index: Option<usize>,
        scan: Arc<ScanPlan>,
        /// Known row count of the file(s), when the source catalogs it.
        file_rows: Option<usize>,
    },
    /// Write the input partition to one file; returns a one-row `path`
    /// table.
    WriteFile {
        partition_id: usize,
        write: Arc<WritePlan>,
    },
    /// Keep rows satisfying every predicate.
    Filter { predicate: ExprList },
    /// Evaluate a projection.
    Project { projection: ExprList },
    /// Replace the partition with a one-row `{count: len}` table.
    LocalCount { schema: Schema },
    /// Keep at most the first `limit` rows.
    LocalLimit { limit: usize },
    /// Keep rows at `[start, min(end, len))`.
    Slice { start: usize, end: usize },
    /// Apply an opaque per-partition transform.
    MapPartition { mapper: Arc<dyn PartitionMapper> },
    /// Sample rows, evaluate the sort keys, and drop rows with any null
    /// key so downstream quantile computation sees only comparable keys.
    Sample {
        sort_by: ExprList,
        num_samples: usize,
    },
    /// Aggregate the partition, optionally per group.
    Aggregate {
        to_agg: Vec<(Expr, AggOp)>,
        group_by: Option<ExprList>,
    },
    /// Join two partitions: inputs are `[left, right]`.
    Join {
        left_on: ExprList,
        right_on: ExprList,
        output_projection: Option<ExprList>,
        how: JoinHow,
    },
    /// Concatenate all inputs.
    ReduceMerge,
    /// Concatenate all inputs, then sort.
    ReduceMergeAndSort {
        sort_by: ExprList,
        descending: Vec<bool>,
    },
    /// Concatenate all inputs, sort by the (already evaluated) key
    /// columns, and keep the quantile boundary rows.
    ReduceToQuantiles {
        num_quantiles: usize,
        sort_by: ExprList,
        descending: Vec<bool>,
    },
    /// Split the input into `num_outputs` partitions at random.
    FanoutRandom { num_outputs: usize, seed: u64 },
    /// Split the input into `num_outputs` partitions by key hash.
    FanoutHash {
        num_outputs: usize,
        partition_by: ExprList,
    },
    /// Split the input by range against broadcast boundaries: inputs are
    /// `[boundaries, input]`. With a single output the input passes
    /// through untouched.
    FanoutRange {
        num_outputs: usize,
        sort_by: ExprList,
        descending: Vec<bool>,
    },
}

impl Instruction {
    /// Short variant name, used in task diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "ReadFile",
            Self::WriteFile { .. } => "WriteFile",
            Self::Filter { .. } => "Filter",
            Self::Project { .. } => "Project",
            Self::LocalCount { .. } => "LocalCount",
            Self::LocalLimit { .. } => "LocalLimit",
            Self::Slice { .. } => "Slice",
            Self::MapPartition { .. } => "MapPartition",
            Self::Sample { .. } => "Sample",
            Self::Aggregate { .. } => "Aggregate",
            Self::Join { .. } => "Join",
            Self::ReduceMerge => "ReduceMerge",
            Self::ReduceMergeAndSort { .. } => "ReduceMergeAndSort",
            Self::ReduceToQuantiles { .. } => "ReduceToQuantiles",
            Self::FanoutRandom { .. } => "FanoutRandom",
            Self::FanoutHash { .. } => "FanoutHash",
            Self::FanoutRange { .. } => "FanoutRange",
        }
    }

    /// Run the instruction over the input partitions.
    ///
    /// # Errors
    /// Data and I/O failures (unknown columns, unreadable files, schema
    /// disagreements) are returned. Arity violations abort.
    pub fn run(&self, inputs: Vec<Table>) -> Result<Vec<Table>> {
        match self {
            Self::ReadFile { index, scan, .. } => {
                let [filepaths] = unary(self, inputs);
                Ok(vec![read_scan_partition(&filepaths, scan, *index)?])
            }
            Self::WriteFile {
                partition_id,
                write,
            } => {
                let [input] = unary(self, inputs);
                Ok(vec![write_partition(&input, write, *partition_id)?])
            }
            Self::Filter { predicate } => {
                let [input] = unary(self, inputs);
                Ok(vec![input.filter(predicate)?])
            }
            Self::Project { projection } => {
                let [input] = unary(self, inputs);
                Ok(vec![input.eval_expression_list(projection)?])
            }
            Self::LocalCount { schema } => {
                let [input] = unary(self, inputs);
                let count = Table::from_columns(vec![Series::from_i64(
                    "count",
                    [input.len() as i64],
                )])?;
                ensure!(
                    count.schema() == *schema,
                    "count produced schema {} but the plan expects {schema}",
                    count.schema()
                );
                Ok(vec![count])
            }
            Self::LocalLimit { limit } => {
                let [input] = unary(self, inputs);
                Ok(vec![input.head(*limit)])
            }
            Self::Slice { start, end } => {
                let [input] = unary(self, inputs);
                let end = (*end).min(input.len());
                let indices: Vec<i64> = (*start..end.max(*start)).map(|i| i as i64).collect();
                Ok(vec![input.take(&Series::from_i64("", indices))?])
            }
            Self::MapPartition { mapper } => {
                let [input] = unary(self, inputs);
                Ok(vec![mapper.run(&input)?])
            }
            Self::Sample {
                sort_by,
                num_samples,
            } => {
                let [input] = unary(self, inputs);
                let keys_non_null: ExprList = sort_by
                    .names()
                    .into_iter()
                    .map(|n| crate::expr::col(n).is_null().not())
                    .collect();
                let result = input
                    .sample(*num_samples)
                    .eval_expression_list(sort_by)?
                    .filter(&keys_non_null)?;
                Ok(vec![result])
            }
            Self::Aggregate { to_agg, group_by } => {
                let [input] = unary(self, inputs);
                Ok(vec![input.agg(to_agg, group_by.as_ref())?])
            }
            Self::Join {
                left_on,
                right_on,
                output_projection,
                how,
            } => {
                let [left, right] = binary(self, inputs);
                Ok(vec![left.join(
                    &right,
                    left_on,
                    right_on,
                    output_projection.as_ref(),
                    *how,
                )?])
            }
            Self::ReduceMerge => Ok(vec![Table::concat(&inputs)?]),
            Self::ReduceMergeAndSort {
                sort_by,
                descending,
            } => Ok(vec![Table::concat(&inputs)?.sort(sort_by, descending)?]),
            Self::ReduceToQuantiles {
                num_quantiles,
                sort_by,
                descending,
            } => {
                let merged = Table::concat(&inputs)?;
                // The sort keys were evaluated by the upstream Sample;
                // sorting by column references avoids evaluating twice.
                let sorted = merged.sort(&sort_by.to_column_refs(), descending)?;
                Ok(vec![sorted.quantiles(*num_quantiles)?])
            }
            Self::FanoutRandom { num_outputs, seed } => {
                let [input] = unary(self, inputs);
                Ok(input.partition_by_random(*num_outputs, *seed))
            }
            Self::FanoutHash {
                num_outputs,
                partition_by,
            } => {
                let [input] = unary(self, inputs);
                input.partition_by_hash(partition_by, *num_outputs)
            }
            Self::FanoutRange {
                num_outputs,
                sort_by,
                descending,
            } => {
                let [boundaries, input] = binary(self, inputs);
                if *num_outputs == 1 {
                    return Ok(vec![input]);
                }
                input.partition_by_range(sort_by, &boundaries, descending)
            }
        }
    }

    /// Derive whatever metadata about the result partitions is knowable
    /// ahead of time. Absence is data: a rule never invents a value.
    pub fn propagate(&self, inputs: &[PartialPartitionMetadata]) -> Vec<PartialPartitionMetadata> {
        match self {
            Self::ReadFile {
                scan, file_rows, ..
            } => {
                assert_eq!(inputs.len(), 1, "ReadFile propagates over one input");
                // The scan limit only tightens a known file row count.
                let num_rows = file_rows.map(|rows| match scan.limit {
                    Some(limit) => rows.min(limit),
                    None => rows,
                });
                vec![PartialPartitionMetadata {
                    num_rows,
                    size_bytes: None,
                }]
            }
            // One file per partition.
            Self::WriteFile { .. } => {
                assert_eq!(inputs.len(), 1, "WriteFile propagates over one input");
                vec![PartialPartitionMetadata::with_rows(1)]
            }
            // Selectivity is unknowable ahead of time.
            Self::Filter { .. } | Self::MapPartition { .. } | Self::Aggregate { .. } => inputs
                .iter()
                .map(|_| PartialPartitionMetadata::unknown())
                .collect(),
            Self::Project { .. } => inputs
                .iter()
                .map(|m| PartialPartitionMetadata {
                    num_rows: m.num_rows,
                    size_bytes: None,
                })
                .collect(),
            Self::LocalCount { .. } => inputs
                .iter()
                .map(|_| PartialPartitionMetadata {
                    num_rows: Some(1),
                    size_bytes: Some(COUNT_RESULT_SIZE_BYTES),
                })
                .collect(),
            Self::LocalLimit { limit } => inputs
                .iter()
                .map(|m| PartialPartitionMetadata {
                    num_rows: m.num_rows.map(|rows| rows.min(*limit)),
                    size_bytes: None,
                })
                .collect(),
            Self::Slice { start, end } => {
                assert_eq!(inputs.len(), 1, "Slice propagates over one input");
                let num_rows = inputs[0]
                    .num_rows
                    .map(|rows| rows.min(*end).saturating_sub(*start));
                vec![PartialPartitionMetadata {
                    num_rows,
                    size_bytes: None,
                }]
            }
            // The null-key drop makes the sampled row count unknowable.
            Self::Sample { .. } => inputs
                .iter()
                .map(|_| PartialPartitionMetadata::unknown())
                .collect(),
            Self::Join { .. } => vec![PartialPartitionMetadata::unknown()],
            Self::ReduceMerge | Self::ReduceMergeAndSort { .. } => {
                let num_rows = sum_known(inputs.iter().map(|m| m.num_rows));
                let size_bytes = sum_known(inputs.iter().map(|m| m.size_bytes));
                vec![PartialPartitionMetadata {
                    num_rows,
                    size_bytes,
                }]
            }
            Self::ReduceToQuantiles { num_quantiles, .. } => vec![PartialPartitionMetadata {
                num_rows: Some(*num_quantiles),
                size_bytes: None,
            }],
            Self::FanoutRandom { num_outputs, .. }
            | Self::FanoutHash { num_outputs, .. }
            | Self::FanoutRange { num_outputs, .. } => (0..*num_outputs)
                .map(|_| PartialPartitionMetadata::unknown())
                .collect(),
        }
    }
}

/// Run an instruction pipeline: each instruction consumes the entire
/// output list of its predecessor.
pub fn run_pipeline(instructions: &[Instruction], inputs: Vec<Table>) -> Result<Vec<Table>> {
    let mut partitions = inputs;
    for instruction in instructions {
        partitions = instruction.run(partitions)?;
    }
    Ok(partitions)
}

/// Destructure a single-input instruction's argument list.
fn unary(inst: &Instruction, inputs: Vec<Table>) -> [Table; 1] {
    let n = inputs.len();
    match <[Table; 1]>::try_from(inputs) {
        Ok(arr) => arr,
        Err(_) => panic!("{} expects exactly 1 input partition, got {n}", inst.name()),
    }
}

/// Destructure a two-input instruction's argument list.
fn binary(inst: &Instruction, inputs: Vec<Table>) -> [Table; 2] {
    let n = inputs.len();
    match <[Table; 2]>::try_from(inputs) {
        Ok(arr) => arr,
        Err(_) => panic!(
            "{} expects exactly 2 input partitions, got {n}",
            inst.name()
        ),
    }
}

fn sum_known(values: impl Iterator<Item = Option<usize>>) -> Option<usize> {
    let mut total = 0usize;
    for v in values {
        total += v?;
    }
    Some(total)
}

fn read_scan_partition(filepaths: &Table, scan: &ScanPlan, index: Option<usize>) -> Result<Table> {
    let path_col = filepaths
        .column("path")
        .context("filepaths partition must carry a `path` column")?;
    let rows: Vec<usize> = match index {
        Some(i) => vec![i],
        None => (0..filepaths.len()).collect(),
    };

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let path = path_col.get(row).to_string();
        tables.push(read_table_file(&path)?);
    }
    let mut result = Table::concat(&tables)?;
    if let Some(columns) = &scan.columns {
        result = result.eval_expression_list(&ExprList::columns(columns.iter().cloned()))?;
    }
    if let Some(limit) = scan.limit {
        result = result.head(limit);
    }
    Ok(result)
}

#[cfg(feature = "io-csv")]
fn read_table_file(path: &str) -> Result<Table> {
    crate::io::read_csv_table(path)
}

#[cfg(not(feature = "io-csv"))]
fn read_table_file(path: &str) -> Result<Table> {
    anyhow::bail!("cannot read {path}: riptide was built without the io-csv feature")
}

#[cfg(feature = "io-csv")]
fn write_partition(input: &Table, write: &WritePlan, partition_id: usize) -> Result<Table> {
    let path = write.root_dir.join(format!("part-{partition_id:05}.csv"));
    crate::io::write_csv_table(input, &path)?;
    Ok(Table::from_columns(vec![Series::from_utf8(
        "path",
        [path.display().to_string()],
    )])?)
}

#[cfg(not(feature = "io-csv"))]
fn write_partition(_input: &Table, _write: &WritePlan, _partition_id: usize) -> Result<Table> {
    anyhow::bail!("cannot write: riptide was built without the io-csv feature")
}
