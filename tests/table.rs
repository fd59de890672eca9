//! Table primitive operations the instructions rely on.

use anyhow::Result;
use riptide::testing::{TableBuilder, assert_rows_unordered_equal, assert_tables_equal, int_table};
use riptide::{Datum, ExprList, JoinHow, Series, Table, col, lit};

#[test]
fn sort_is_stable_within_equal_keys() -> Result<()> {
    let t = TableBuilder::new()
        .with_i64("k", [2, 1, 2, 1])
        .with_utf8("tag", ["a", "b", "c", "d"])
        .build();
    let sorted = t.sort(&ExprList::new(vec![col("k")]), &[false])?;

    let expected = TableBuilder::new()
        .with_i64("k", [1, 1, 2, 2])
        .with_utf8("tag", ["b", "d", "a", "c"])
        .build();
    assert_tables_equal(&sorted, &expected);
    Ok(())
}

#[test]
fn sort_honors_per_key_direction() -> Result<()> {
    let t = TableBuilder::new()
        .with_i64("a", [1, 1, 2, 2])
        .with_i64("b", [10, 20, 30, 40])
        .build();
    let sorted = t.sort(&ExprList::new(vec![col("a"), col("b")]), &[false, true])?;

    let expected = TableBuilder::new()
        .with_i64("a", [1, 1, 2, 2])
        .with_i64("b", [20, 10, 40, 30])
        .build();
    assert_tables_equal(&sorted, &expected);
    Ok(())
}

#[test]
fn nulls_sort_first_ascending() -> Result<()> {
    let t = TableBuilder::new()
        .with_column(Series::new(
            "x",
            vec![Datum::Int(2), Datum::Null, Datum::Int(1)],
        ))
        .build();
    let sorted = t.sort(&ExprList::new(vec![col("x")]), &[false])?;
    assert_eq!(
        sorted.column("x")?.values(),
        &[Datum::Null, Datum::Int(1), Datum::Int(2)]
    );
    Ok(())
}

#[test]
fn concat_requires_matching_column_names() {
    let a = int_table("x", 0..3);
    let b = int_table("y", 0..3);
    assert!(Table::concat(&[a, b]).is_err());
}

#[test]
fn concat_unifies_all_null_columns() -> Result<()> {
    let typed = int_table("x", [1, 2]);
    let empty = Table::empty(&typed.schema());
    let merged = Table::concat(&[empty, typed.clone()])?;
    assert_tables_equal(&merged, &typed);
    Ok(())
}

#[test]
fn take_rejects_out_of_range_indices() {
    let t = int_table("x", 0..3);
    assert!(t.take(&Series::from_i64("i", [5])).is_err());
    assert!(t.take(&Series::from_i64("i", [-1])).is_err());
}

#[test]
fn filter_drops_null_predicate_rows() -> Result<()> {
    let t = TableBuilder::new()
        .with_column(Series::new(
            "x",
            vec![Datum::Int(5), Datum::Null, Datum::Int(1)],
        ))
        .build();
    let kept = t.filter(&ExprList::new(vec![col("x").gt(lit(0))]))?;
    assert_eq!(kept.len(), 2);
    Ok(())
}

#[test]
fn sample_is_deterministic_and_bounded() {
    let t = int_table("x", 0..100);
    let a = t.sample(10);
    let b = t.sample(10);
    assert_eq!(a.len(), 10);
    assert_tables_equal(&a, &b);

    // Oversampling returns the table unchanged.
    assert_tables_equal(&t.sample(1000), &t);
}

#[test]
fn quantiles_of_a_sorted_table() -> Result<()> {
    let t = int_table("x", 0..100);
    let q = t.quantiles(4)?;
    assert_tables_equal(&q, &int_table("x", [25, 50, 75]));
    Ok(())
}

#[test]
fn global_aggregation_of_an_empty_table_is_one_row() -> Result<()> {
    let t = int_table("x", []);
    let out = t.agg(&[(col("x"), riptide::AggOp::Count)], None)?;
    assert_tables_equal(&out, &int_table("x", [0]));
    Ok(())
}

#[test]
fn aggregation_ignores_nulls() -> Result<()> {
    let t = TableBuilder::new()
        .with_column(Series::new(
            "v",
            vec![Datum::Int(10), Datum::Null, Datum::Int(20)],
        ))
        .build();
    let out = t.agg(
        &[
            (col("v").alias("sum"), riptide::AggOp::Sum),
            (col("v").alias("count"), riptide::AggOp::Count),
            (col("v").alias("mean"), riptide::AggOp::Mean),
        ],
        None,
    )?;
    assert_eq!(out.column("sum")?.values(), &[Datum::Int(30)]);
    assert_eq!(out.column("count")?.values(), &[Datum::Int(2)]);
    assert_eq!(out.column("mean")?.values(), &[Datum::float(15.0)]);
    Ok(())
}

#[test]
fn outer_join_keeps_both_unmatched_sides() -> Result<()> {
    let left = TableBuilder::new()
        .with_i64("k", [1, 2])
        .with_utf8("l", ["a", "b"])
        .build();
    let right = TableBuilder::new()
        .with_i64("k", [2, 3])
        .with_utf8("r", ["x", "y"])
        .build();

    let joined = left.join(
        &right,
        &ExprList::new(vec![col("k")]),
        &ExprList::new(vec![col("k")]),
        None,
        JoinHow::Outer,
    )?;
    assert_eq!(joined.len(), 3);

    // Unmatched rows carry nulls on the missing side.
    let l = joined.column("l")?;
    let r = joined.column("r")?;
    assert_eq!(l.values().iter().filter(|v| v.is_null()).count(), 1);
    assert_eq!(r.values().iter().filter(|v| v.is_null()).count(), 1);
    Ok(())
}

#[test]
fn left_join_preserves_left_row_order() -> Result<()> {
    let left = int_table("k", [3, 1, 2]);
    let right = TableBuilder::new()
        .with_i64("k", [1, 2])
        .with_i64("v", [10, 20])
        .build();
    let joined = left.join(
        &right,
        &ExprList::new(vec![col("k")]),
        &ExprList::new(vec![col("k")]),
        None,
        JoinHow::Left,
    )?;
    assert_eq!(
        joined.column("k")?.values(),
        &[Datum::Int(3), Datum::Int(1), Datum::Int(2)]
    );
    assert_eq!(
        joined.column("v")?.values(),
        &[Datum::Null, Datum::Int(10), Datum::Int(20)]
    );
    Ok(())
}

#[test]
fn null_join_keys_never_match() -> Result<()> {
    let left = TableBuilder::new()
        .with_column(Series::new("k", vec![Datum::Null, Datum::Int(1)]))
        .build();
    let right = TableBuilder::new()
        .with_column(Series::new("k", vec![Datum::Null, Datum::Int(1)]))
        .build();
    let joined = left.join(
        &right,
        &ExprList::new(vec![col("k")]),
        &ExprList::new(vec![col("k")]),
        None,
        JoinHow::Inner,
    )?;
    assert_eq!(joined.len(), 1);
    Ok(())
}

#[test]
fn join_output_projection_shapes_the_result() -> Result<()> {
    let left = TableBuilder::new()
        .with_i64("k", [1])
        .with_i64("a", [10])
        .build();
    let right = TableBuilder::new()
        .with_i64("k", [1])
        .with_i64("b", [5])
        .build();
    let joined = left.join(
        &right,
        &ExprList::new(vec![col("k")]),
        &ExprList::new(vec![col("k")]),
        Some(&ExprList::new(vec![col("a").add(col("b")).alias("total")])),
        JoinHow::Inner,
    )?;
    assert_tables_equal(&joined, &int_table("total", [15]));
    Ok(())
}

#[test]
fn partition_by_hash_is_total_and_colocating() -> Result<()> {
    let t = int_table("k", (0..40).map(|i| i % 8));
    let parts = t.partition_by_hash(&ExprList::new(vec![col("k")]), 3)?;
    assert_eq!(parts.len(), 3);
    assert_eq!(parts.iter().map(Table::len).sum::<usize>(), 40);
    let merged = Table::concat(&parts)?;
    assert_rows_unordered_equal(&merged, &t);
    Ok(())
}

#[test]
fn partition_by_range_respects_descending_keys() -> Result<()> {
    // Descending sort: boundaries run high to low.
    let boundaries = int_table("x", [20, 10]);
    let t = int_table("x", [25, 15, 5]);
    let parts = t.partition_by_range(&ExprList::new(vec![col("x")]), &boundaries, &[true])?;
    assert_eq!(parts.len(), 3);
    assert_rows_unordered_equal(&parts[0], &int_table("x", [25]));
    assert_rows_unordered_equal(&parts[1], &int_table("x", [15]));
    assert_rows_unordered_equal(&parts[2], &int_table("x", [5]));
    Ok(())
}
