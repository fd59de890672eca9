//! File scan and write plans, glob expansion, and CSV type inference.
#![cfg(feature = "io-csv")]

use anyhow::Result;
use riptide::io::{expand_paths, read_csv_table, write_csv_table};
use riptide::testing::{TableBuilder, assert_rows_unordered_equal, assert_tables_equal, int_table};
use riptide::{
    DataType, Datum, ExecMode, ExprList, LogicalPlan, Runner, ScanPlan, WritePlan, col,
};
use std::fs;
use tempfile::tempdir;

fn sample_table(offset: i64) -> riptide::Table {
    TableBuilder::new()
        .with_i64("id", offset..offset + 10)
        .with_f64("score", (0..10).map(|i| i as f64 / 2.0))
        .with_utf8("name", (0..10).map(|i| format!("row{i}")))
        .build()
}

#[test]
fn csv_round_trip_preserves_shape_and_types() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("data.csv");
    let table = sample_table(0);

    write_csv_table(&table, &path)?;
    let back = read_csv_table(&path)?;
    assert_tables_equal(&back, &table);
    Ok(())
}

#[test]
fn csv_reader_infers_types_and_nulls() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("typed.csv");
    fs::write(&path, "i,f,b,s\n1,1.5,true,abc\n,2.5,false,\n3,,true,xyz\n")?;

    let table = read_csv_table(&path)?;
    let schema = table.schema();
    let dtypes: Vec<DataType> = schema.fields().iter().map(|f| f.dtype).collect();
    assert_eq!(
        dtypes,
        vec![
            DataType::Int64,
            DataType::Float64,
            DataType::Bool,
            DataType::Utf8
        ]
    );
    assert_eq!(
        table.column("i")?.values(),
        &[Datum::Int(1), Datum::Null, Datum::Int(3)]
    );
    assert_eq!(
        table.column("f")?.values(),
        &[Datum::float(1.5), Datum::float(2.5), Datum::Null]
    );
    Ok(())
}

#[test]
fn expand_paths_sorts_matches_and_rejects_misses() -> Result<()> {
    let dir = tempdir()?;
    for name in ["b.csv", "a.csv", "c.csv"] {
        fs::write(dir.path().join(name), "x\n1\n")?;
    }
    let pattern = format!("{}/*.csv", dir.path().display());
    let paths = expand_paths(&pattern)?;
    let names: Vec<&str> = paths.iter().map(|p| p.rsplit('/').next().unwrap()).collect();
    assert_eq!(names, vec!["a.csv", "b.csv", "c.csv"]);

    assert!(expand_paths(&format!("{}/*.parquet", dir.path().display())).is_err());
    Ok(())
}

#[test]
fn write_plan_emits_one_file_per_partition() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("out");
    let partitions = vec![sample_table(0), sample_table(100), sample_table(200)];

    let runner = Runner::new(ExecMode::Sequential);
    let plan = LogicalPlan::in_memory(partitions)?.write(WritePlan::new(&out));
    let entry = runner.run(&plan)?;

    // The write result is one single-row `path` partition per input.
    let set = runner.cache().get(entry).unwrap();
    assert_eq!(set.num_partitions(), 3);
    assert_eq!(set.len(), 3);

    let mut written: Vec<String> = fs::read_dir(&out)?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(
        written,
        vec!["part-00000.csv", "part-00001.csv", "part-00002.csv"]
    );
    Ok(())
}

#[test]
fn scan_plan_round_trips_written_partitions() -> Result<()> {
    let dir = tempdir()?;
    let out = dir.path().join("dataset");
    let partitions = vec![sample_table(0), sample_table(100)];
    let merged = riptide::Table::concat(&partitions)?;

    let runner = Runner::new(ExecMode::Sequential);
    runner.run(&LogicalPlan::in_memory(partitions)?.write(WritePlan::new(&out)))?;

    let scan = ScanPlan::from_glob(&format!("{}/*.csv", out.display()), 2)?;
    let plan = LogicalPlan::tabular_scan(scan);
    assert_eq!(plan.num_partitions(), 2);

    let entry = runner.run(&plan)?;
    let back = runner.cache().get(entry).unwrap().concat()?;
    assert_rows_unordered_equal(&back, &merged);
    Ok(())
}

#[test]
fn scan_applies_column_pruning_and_limits() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("wide.csv");
    write_csv_table(&sample_table(0), &path)?;

    let scan = ScanPlan::from_paths(vec![path.display().to_string()], 1)
        .with_columns(vec!["id".into()])
        .with_limit(4);
    let runner = Runner::new(ExecMode::Sequential);
    let entry = runner.run(&LogicalPlan::tabular_scan(scan))?;
    let table = runner.cache().get(entry).unwrap().concat()?;
    assert_tables_equal(&table, &int_table("id", 0..4));
    Ok(())
}

#[test]
fn limit_over_scan_is_exact_across_partitions() -> Result<()> {
    let dir = tempdir()?;
    for (i, offset) in [0i64, 100, 200].iter().enumerate() {
        write_csv_table(&sample_table(*offset), &dir.path().join(format!("p{i}.csv")))?;
    }

    let scan = ScanPlan::from_glob(&format!("{}/*.csv", dir.path().display()), 3)?;
    let plan = LogicalPlan::tabular_scan(scan).limit(14);

    let runner = Runner::new(ExecMode::Sequential);
    let entry = runner.run(&plan)?;
    let set = runner.cache().get(entry).unwrap();
    assert_eq!(set.len(), 14);

    // The head of the sorted file list wins.
    let ids = set.concat()?.eval_expression_list(&ExprList::new(vec![col("id")]))?;
    let expected = int_table("id", (0..10).chain(100..104));
    assert_tables_equal(&ids, &expected);
    Ok(())
}
