//! End-to-end schedule walks, driven by a hand-rolled executor so the
//! `Construction` surface (inputs, pipeline, fan-out count, completion
//! callback) is exercised directly.

use anyhow::Result;
use riptide::testing::{
    TableBuilder, assert_rows_unordered_equal, assert_tables_equal, int_range_partitions,
    int_table,
};
use riptide::{
    AggOp, Datum, ExprList, JoinHow, LocalMaterializedResult, LocalPartition, LogicalPlan,
    Materialize, MaterializePoll, MaterializedResultBox, PartitionMapper, PartitionRef,
    PartitionSet, RepartitionScheme, Table, col, lit, run_pipeline,
};
use std::sync::Arc;

/// What one executed construction looked like.
struct Executed {
    instructions: Vec<String>,
    output_rows: Vec<usize>,
}

/// Single-threaded executor over a materialize adapter, recording every
/// construction it ran.
fn drive(plan: &LogicalPlan) -> Result<(PartitionSet<LocalPartition>, Vec<Executed>)> {
    let mut schedule: Materialize<LocalPartition> = Materialize::from_plan(plan);
    let mut log = Vec::new();
    loop {
        match schedule.next_construction()? {
            MaterializePoll::Ready(construction) => {
                let tables: Vec<Table> = construction
                    .inputs()
                    .iter()
                    .map(|p| (*p.table()).clone())
                    .collect();
                let instructions = construction.instructions();
                let outputs = run_pipeline(&instructions, tables)?;
                assert_eq!(
                    outputs.len(),
                    construction.num_results(),
                    "pipeline arity must match the declared fan-out"
                );
                log.push(Executed {
                    instructions: instructions.iter().map(|i| i.name().to_string()).collect(),
                    output_rows: outputs.iter().map(Table::len).collect(),
                });
                let results: Vec<MaterializedResultBox<LocalPartition>> = outputs
                    .into_iter()
                    .map(|t| {
                        Box::new(LocalMaterializedResult::new(LocalPartition::from_table(
                            Arc::new(t),
                        ))) as MaterializedResultBox<LocalPartition>
                    })
                    .collect();
                construction.report_completed(results);
            }
            MaterializePoll::Pending => {
                panic!("schedule yielded no construction in a single-threaded drive")
            }
            MaterializePoll::Exhausted => break,
        }
    }
    Ok((schedule.result_partition_set(), log))
}

fn concat_set(set: &PartitionSet<LocalPartition>) -> Result<Table> {
    Ok(set.concat()?)
}

#[test]
fn pipelined_ops_fuse_into_one_task_per_partition() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 30, 3))?
        .filter(ExprList::new(vec![col("x").gt_eq(lit(10))]))
        .project(ExprList::new(vec![col("x").mul(lit(2)).alias("y")]));

    let (set, log) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 3);

    // One fused task per source partition: no extra materializations.
    assert_eq!(log.len(), 3);
    for executed in &log {
        assert_eq!(executed.instructions, vec!["Filter", "Project"]);
    }

    let expected = int_table("y", (10..30).map(|x| x * 2));
    assert_rows_unordered_equal(&concat_set(&set)?, &expected);
    Ok(())
}

#[test]
fn global_limit_clips_across_partitions_in_order() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 30, 3))?.limit(25);
    let (set, _) = drive(&plan)?;

    assert_eq!(set.num_partitions(), 3);
    let rows: Vec<usize> = set
        .partitions()
        .iter()
        .map(|p| p.metadata().num_rows)
        .collect();
    assert_eq!(rows, vec![10, 10, 5]);

    // The limit keeps the head of the dataset, in partition order.
    assert_tables_equal(&concat_set(&set)?, &int_table("x", 0..25));
    Ok(())
}

#[test]
fn tiny_global_limit_empties_later_partitions() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 30, 3))?.limit(4);
    let (set, _) = drive(&plan)?;
    let rows: Vec<usize> = set
        .partitions()
        .iter()
        .map(|p| p.metadata().num_rows)
        .collect();
    assert_eq!(rows, vec![4, 0, 0]);
    Ok(())
}

#[test]
fn sort_runs_the_quantile_protocol() -> Result<()> {
    // Interleave values so every partition spans the whole range.
    let partitions: Vec<Table> = (0..3)
        .map(|p| int_table("x", (0..40).map(|i| (i * 3 + p) % 120)))
        .collect();
    let total: usize = partitions.iter().map(Table::len).sum();

    let plan = LogicalPlan::in_memory(partitions)?
        .sort(ExprList::new(vec![col("x")]), vec![false]);
    let (set, log) = drive(&plan)?;

    // Protocol shape: one sample per input, one quantile reduce, one
    // range fan-out per input, one merge-sort per output range.
    let count_of = |name: &str| {
        log.iter()
            .filter(|e| e.instructions.iter().any(|i| i == name))
            .count()
    };
    assert_eq!(count_of("Sample"), 3);
    assert_eq!(count_of("ReduceToQuantiles"), 1);
    assert_eq!(count_of("FanoutRange"), 3);
    assert_eq!(count_of("ReduceMergeAndSort"), 3);

    // The boundaries partition carries num_outputs - 1 rows.
    let quantiles = log
        .iter()
        .find(|e| e.instructions.iter().any(|i| i == "ReduceToQuantiles"))
        .unwrap();
    assert_eq!(quantiles.output_rows, vec![2]);

    // Sorting preserves the multiset and the concatenation of output
    // partitions is globally ordered.
    assert_eq!(set.num_partitions(), 3);
    assert_eq!(set.len(), total);
    let merged = concat_set(&set)?;
    let values = merged.column("x")?.values().to_vec();
    let mut sorted = values.clone();
    sorted.sort();
    assert_eq!(values, sorted);
    Ok(())
}

#[test]
fn descending_sort_reverses_the_global_order() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 50, 4))?
        .sort(ExprList::new(vec![col("x")]), vec![true]);
    let (set, _) = drive(&plan)?;

    let merged = concat_set(&set)?;
    let values = merged.column("x")?.values().to_vec();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(values, sorted);
    assert_eq!(merged.len(), 50);
    Ok(())
}

#[test]
fn single_partition_sort_skips_the_quantile_protocol() -> Result<()> {
    let plan = LogicalPlan::in_memory(vec![int_table("x", [5, 2, 9, 0])])?
        .sort(ExprList::new(vec![col("x")]), vec![false]);
    let (set, log) = drive(&plan)?;
    assert!(
        log.iter()
            .all(|e| !e.instructions.iter().any(|i| i == "Sample")),
        "a one-partition sort needs no sampling"
    );
    assert_tables_equal(&concat_set(&set)?, &int_table("x", [0, 2, 5, 9]));
    Ok(())
}

#[test]
fn hash_repartition_colocates_keys_and_preserves_rows() -> Result<()> {
    let input: Vec<Table> = (0..2)
        .map(|p| int_table("k", (0..30).map(|i| (i + p * 30) % 12)))
        .collect();
    let merged_input = Table::concat(&input)?;

    let plan = LogicalPlan::in_memory(input)?.repartition(
        5,
        RepartitionScheme::Hash {
            partition_by: ExprList::new(vec![col("k")]),
        },
    );
    let (set, _) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 5);
    assert_rows_unordered_equal(&concat_set(&set)?, &merged_input);

    // Each key lives in exactly one output partition.
    for key in 0..12i64 {
        let holders = set
            .tables()
            .iter()
            .filter(|t| {
                t.column("k")
                    .unwrap()
                    .values()
                    .iter()
                    .any(|v| *v == Datum::Int(key))
            })
            .count();
        assert_eq!(holders, 1, "key {key} should live in one partition");
    }
    Ok(())
}

#[test]
fn random_repartition_preserves_rows() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 100, 2))?
        .repartition(4, RepartitionScheme::Random { seed: 11 });
    let (set, _) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 4);
    assert_rows_unordered_equal(&concat_set(&set)?, &int_table("x", 0..100));
    Ok(())
}

#[test]
fn grouped_aggregation_shuffles_then_aggregates() -> Result<()> {
    let partitions: Vec<Table> = (0..3)
        .map(|p| {
            TableBuilder::new()
                .with_i64("k", (0..20).map(|i| i % 4))
                .with_i64("v", (0..20).map(|i| i + p * 100))
                .build()
        })
        .collect();
    let plan = LogicalPlan::in_memory(partitions)?.aggregate(
        vec![(col("v"), AggOp::Sum)],
        Some(ExprList::new(vec![col("k")])),
    );
    let (set, _) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 3);

    let merged = concat_set(&set)?;
    assert_eq!(merged.len(), 4, "one row per group key");

    // Independently computed expectation.
    let mut expected = [0i64; 4];
    for p in 0..3i64 {
        for i in 0..20i64 {
            expected[(i % 4) as usize] += i + p * 100;
        }
    }
    let expected = TableBuilder::new()
        .with_i64("k", 0..4)
        .with_i64("v", expected)
        .build();
    assert_rows_unordered_equal(&merged, &expected);
    Ok(())
}

#[test]
fn global_aggregation_gathers_to_one_partition() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 100, 4))?
        .aggregate(vec![(col("x"), AggOp::Sum)], None);
    let (set, _) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 1);
    assert_tables_equal(&concat_set(&set)?, &int_table("x", [4950]));
    Ok(())
}

#[test]
fn count_produces_one_single_row_partition() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 77, 3))?.count();
    let (set, log) = drive(&plan)?;
    assert_eq!(set.num_partitions(), 1);
    assert_tables_equal(&concat_set(&set)?, &int_table("count", [77]));

    // Each partition counted locally before the gather.
    let local_counts = log
        .iter()
        .filter(|e| e.instructions.iter().any(|i| i == "LocalCount"))
        .count();
    assert_eq!(local_counts, 3);
    Ok(())
}

#[test]
fn join_colocates_and_joins_each_key_range() -> Result<()> {
    let left = TableBuilder::new()
        .with_i64("id", 0..20)
        .with_i64("a", (0..20).map(|i| i * 10))
        .build();
    let right = TableBuilder::new()
        .with_i64("id", (5..25).collect::<Vec<_>>())
        .with_i64("b", (5..25).map(|i| i * 1000))
        .build();

    let plan = LogicalPlan::in_memory(vec![left])?.join(
        LogicalPlan::in_memory(vec![right])?,
        ExprList::new(vec![col("id")]),
        ExprList::new(vec![col("id")]),
        Some(ExprList::new(vec![
            col("id"),
            col("a").add(col("b")).alias("total"),
        ])),
        JoinHow::Inner,
    );
    let (set, _) = drive(&plan)?;

    let expected = TableBuilder::new()
        .with_i64("id", 5..20)
        .with_i64("total", (5..20).map(|i| i * 10 + i * 1000))
        .build();
    assert_rows_unordered_equal(&concat_set(&set)?, &expected);
    Ok(())
}

#[derive(Debug)]
struct TagRows;

impl PartitionMapper for TagRows {
    fn run(&self, input: &Table) -> anyhow::Result<Table> {
        input.eval_expression_list(&ExprList::new(vec![
            col("x"),
            col("x").mul(lit(0)).alias("zero"),
        ]))
    }
}

#[test]
fn map_partition_applies_a_custom_transform() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 10, 2))?
        .map_partition(Arc::new(TagRows));
    let (set, _) = drive(&plan)?;
    let merged = concat_set(&set)?;
    assert_eq!(merged.num_columns(), 2);
    assert!(
        merged
            .column("zero")?
            .values()
            .iter()
            .all(|v| *v == Datum::Int(0))
    );
    Ok(())
}
