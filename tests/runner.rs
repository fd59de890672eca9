//! Runner behavior: sequential/parallel equivalence, error handling, the
//! partition cache.

use anyhow::Result;
use riptide::testing::{assert_rows_unordered_equal, assert_tables_equal, int_range_partitions, int_table};
use riptide::{
    AggOp, ExecMode, ExprList, LogicalPlan, RepartitionScheme, Runner, Table, col, lit,
};

fn mixed_plan() -> Result<LogicalPlan> {
    Ok(LogicalPlan::in_memory(int_range_partitions("x", 200, 4))?
        .filter(ExprList::new(vec![col("x").lt(lit(150))]))
        .repartition(
            3,
            RepartitionScheme::Hash {
                partition_by: ExprList::new(vec![col("x")]),
            },
        )
        .sort(ExprList::new(vec![col("x")]), vec![false]))
}

fn collect(runner: &Runner, plan: &LogicalPlan) -> Result<Table> {
    let entry = runner.run(plan)?;
    let set = runner.cache().get(entry).expect("entry just inserted");
    Ok(set.concat()?)
}

#[test]
fn sequential_and_parallel_agree() -> Result<()> {
    let plan = mixed_plan()?;

    let seq = collect(&Runner::new(ExecMode::Sequential), &plan)?;
    let par = collect(
        &Runner::new(ExecMode::Parallel { threads: Some(4) }),
        &plan,
    )?;

    // The sort makes output order deterministic, so exact equality holds.
    assert_tables_equal(&seq, &par);
    assert_tables_equal(&seq, &int_table("x", 0..150));
    Ok(())
}

#[test]
fn parallel_default_thread_count() -> Result<()> {
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 50, 5))?
        .aggregate(vec![(col("x"), AggOp::Count)], None);
    let out = collect(&Runner::default(), &plan)?;
    assert_tables_equal(&out, &int_table("x", [50]));
    Ok(())
}

#[test]
fn executor_errors_abort_the_run_and_cache_nothing() -> Result<()> {
    let runner = Runner::new(ExecMode::Sequential);
    let plan = LogicalPlan::in_memory(vec![int_table("x", 0..10)])?
        .filter(ExprList::new(vec![col("missing").gt(lit(0))]));

    let err = runner.run(&plan).unwrap_err();
    assert!(err.to_string().contains("missing"), "got: {err}");
    assert!(runner.cache().is_empty(), "failed runs must not cache");
    Ok(())
}

#[test]
fn parallel_errors_propagate_too() -> Result<()> {
    let runner = Runner::new(ExecMode::Parallel { threads: Some(2) });
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 40, 4))?
        .project(ExprList::new(vec![col("nope")]));
    assert!(runner.run(&plan).is_err());
    Ok(())
}

#[test]
fn cache_entries_are_independent_and_evictable() -> Result<()> {
    let runner = Runner::new(ExecMode::Sequential);
    let a = runner.run(&LogicalPlan::in_memory(vec![int_table("x", 0..5)])?)?;
    let b = runner.run(&LogicalPlan::in_memory(vec![int_table("x", 5..9)])?)?;
    assert_ne!(a, b);
    assert_eq!(runner.cache().len(), 2);

    assert_eq!(runner.cache().get(a).unwrap().len(), 5);
    assert_eq!(runner.cache().get(b).unwrap().len(), 4);

    runner.cache().evict(a);
    assert!(runner.cache().get(a).is_none());
    assert_eq!(runner.cache().len(), 1);
    Ok(())
}

#[test]
fn in_memory_partitions_round_trip_unchanged() -> Result<()> {
    // A bare scan re-materializes the source partitions as the result.
    let parts = int_range_partitions("x", 20, 2);
    let runner = Runner::new(ExecMode::Sequential);
    let entry = runner.run(&LogicalPlan::in_memory(parts.clone())?)?;
    let set = runner.cache().get(entry).unwrap();
    assert_eq!(set.num_partitions(), 2);
    for (out, expected) in set.tables().iter().zip(&parts) {
        assert_tables_equal(out, expected);
    }
    Ok(())
}

#[test]
fn repeated_runs_of_one_plan_agree() -> Result<()> {
    // Seeded shuffles make reruns reproducible partition by partition.
    let plan = LogicalPlan::in_memory(int_range_partitions("x", 60, 3))?
        .repartition(4, RepartitionScheme::Random { seed: 3 });
    let runner = Runner::new(ExecMode::Sequential);

    let first = runner.cache().get(runner.run(&plan)?).unwrap();
    let second = runner.cache().get(runner.run(&plan)?).unwrap();
    assert_eq!(first.num_partitions(), second.num_partitions());
    for (a, b) in first.tables().iter().zip(second.tables().iter()) {
        assert_tables_equal(a, b);
    }
    assert_rows_unordered_equal(&first.concat()?, &int_table("x", 0..60));
    Ok(())
}

#[cfg(feature = "metrics")]
mod metrics {
    use super::*;
    use riptide::metrics::MetricsCollector;

    #[test]
    fn runner_records_execution_counters() -> Result<()> {
        let runner = Runner::new(ExecMode::Sequential);
        runner.set_metrics(MetricsCollector::new());

        let plan = LogicalPlan::in_memory(int_range_partitions("x", 30, 3))?
            .filter(ExprList::new(vec![col("x").gt_eq(lit(0))]));
        runner.run(&plan)?;

        let collector = runner.take_metrics().expect("metrics were enabled");
        let snapshot = collector.to_json();
        assert_eq!(snapshot["tasks_dispatched"], 3);
        assert_eq!(snapshot["partitions_materialized"], 3);
        assert_eq!(snapshot["rows_materialized"], 30);
        assert_eq!(snapshot["partitions_cached"], 3);
        Ok(())
    }

    #[test]
    fn metrics_save_as_json() -> Result<()> {
        let runner = Runner::new(ExecMode::Sequential);
        runner.set_metrics(MetricsCollector::new());
        runner.run(&LogicalPlan::in_memory(vec![int_table("x", 0..5)])?)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("metrics.json");
        let collector = runner.take_metrics().unwrap();
        collector.save_to_file(&path)?;

        let body = std::fs::read_to_string(&path)?;
        let parsed: serde_json::Value = serde_json::from_str(&body)?;
        assert!(parsed.get("elapsed_ms").is_some());
        assert_eq!(parsed["tasks_dispatched"], 1);
        Ok(())
    }
}
