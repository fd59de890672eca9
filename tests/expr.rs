//! Expression evaluation semantics.

use anyhow::Result;
use riptide::testing::{TableBuilder, int_table};
use riptide::{DataType, Datum, ExprList, Series, col, lit};

#[test]
fn arithmetic_keeps_ints_except_division() -> Result<()> {
    let t = int_table("x", [6, 9]);

    let sum = col("x").add(lit(1)).eval(&t)?;
    assert_eq!(sum.values(), &[Datum::Int(7), Datum::Int(10)]);
    assert_eq!(sum.dtype(), DataType::Int64);

    let div = col("x").div(lit(3)).eval(&t)?;
    assert_eq!(div.dtype(), DataType::Float64);
    assert_eq!(div.values(), &[Datum::float(2.0), Datum::float(3.0)]);
    Ok(())
}

#[test]
fn division_by_zero_is_null() -> Result<()> {
    let t = int_table("x", [1]);
    let out = col("x").div(lit(0)).eval(&t)?;
    assert_eq!(out.values(), &[Datum::Null]);
    Ok(())
}

#[test]
fn null_operands_poison_comparisons() -> Result<()> {
    let t = TableBuilder::new()
        .with_column(Series::new("x", vec![Datum::Int(1), Datum::Null]))
        .build();
    let out = col("x").gt(lit(0)).eval(&t)?;
    assert_eq!(out.values(), &[Datum::Bool(true), Datum::Null]);
    Ok(())
}

#[test]
fn is_null_is_never_null() -> Result<()> {
    let t = TableBuilder::new()
        .with_column(Series::new("x", vec![Datum::Int(1), Datum::Null]))
        .build();
    let out = col("x").is_null().eval(&t)?;
    assert_eq!(out.values(), &[Datum::Bool(false), Datum::Bool(true)]);

    let negated = col("x").is_null().not().eval(&t)?;
    assert_eq!(negated.values(), &[Datum::Bool(true), Datum::Bool(false)]);
    Ok(())
}

#[test]
fn mixed_numeric_comparison_goes_through_f64() -> Result<()> {
    let t = TableBuilder::new().with_f64("x", [1.5, 3.0]).build();
    let out = col("x").lt(lit(2)).eval(&t)?;
    assert_eq!(out.values(), &[Datum::Bool(true), Datum::Bool(false)]);
    Ok(())
}

#[test]
fn alias_renames_the_output_column() -> Result<()> {
    let t = int_table("x", [1]);
    let out = col("x").add(lit(1)).alias("y").eval(&t)?;
    assert_eq!(out.name(), "y");

    // Without an alias the leftmost column reference names the result.
    let out = col("x").add(lit(1)).eval(&t)?;
    assert_eq!(out.name(), "x");
    Ok(())
}

#[test]
fn boolean_connectives() -> Result<()> {
    let t = int_table("x", [1, 5, 9]);
    let out = col("x")
        .gt(lit(2))
        .and(col("x").lt(lit(7)))
        .eval(&t)?;
    assert_eq!(
        out.values(),
        &[Datum::Bool(false), Datum::Bool(true), Datum::Bool(false)]
    );

    let out = col("x")
        .lt(lit(2))
        .or(col("x").gt(lit(7)))
        .eval(&t)?;
    assert_eq!(
        out.values(),
        &[Datum::Bool(true), Datum::Bool(false), Datum::Bool(true)]
    );
    Ok(())
}

#[test]
fn unknown_column_errors() {
    let t = int_table("x", [1]);
    assert!(col("nope").eval(&t).is_err());
}

#[test]
fn expr_list_names_and_column_refs() {
    let exprs = ExprList::new(vec![col("a").add(col("b")).alias("sum"), col("c")]);
    assert_eq!(exprs.names(), vec!["sum", "c"]);

    let refs = exprs.to_column_refs();
    assert_eq!(refs.exprs(), &[col("sum"), col("c")]);
}

#[test]
fn utf8_equality_and_ordering() -> Result<()> {
    let t = TableBuilder::new().with_utf8("s", ["apple", "pear"]).build();
    let eq = col("s").eq(lit("pear")).eval(&t)?;
    assert_eq!(eq.values(), &[Datum::Bool(false), Datum::Bool(true)]);

    let lt = col("s").lt(lit("banana")).eval(&t)?;
    assert_eq!(lt.values(), &[Datum::Bool(true), Datum::Bool(false)]);
    Ok(())
}
