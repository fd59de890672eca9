//! Test utilities: table builders, fixtures, and assertions.
//!
//! Integration tests (and downstream users writing pipeline tests) build
//! small tables fluently and compare results either exactly or as row
//! multisets — shuffles and joins do not promise row order, so most
//! end-to-end assertions want the unordered form.

use crate::series::{Datum, Series};
use crate::table::Table;
use std::fmt::Write as _;

/// Fluent builder for small test tables.
///
/// ```
/// use riptide::testing::TableBuilder;
///
/// let t = TableBuilder::new()
///     .with_i64("id", [1, 2, 3])
///     .with_utf8("name", ["a", "b", "c"])
///     .build();
/// assert_eq!(t.len(), 3);
/// ```
#[derive(Default)]
pub struct TableBuilder {
    columns: Vec<Series>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_i64(mut self, name: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.columns.push(Series::from_i64(name, values));
        self
    }

    #[must_use]
    pub fn with_f64(mut self, name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        self.columns.push(Series::from_f64(name, values));
        self
    }

    #[must_use]
    pub fn with_utf8<S: Into<String>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.columns.push(Series::from_utf8(name, values));
        self
    }

    #[must_use]
    pub fn with_column(mut self, series: Series) -> Self {
        self.columns.push(series);
        self
    }

    /// Build the table.
    ///
    /// # Panics
    /// Panics on ragged columns or duplicate names — construction bugs in
    /// a test are better loud.
    pub fn build(self) -> Table {
        Table::from_columns(self.columns).expect("test table construction failed")
    }
}

/// A single-column int64 table, the workhorse fixture.
pub fn int_table(name: &str, values: impl IntoIterator<Item = i64>) -> Table {
    TableBuilder::new().with_i64(name, values).build()
}

/// Split `0..n` into `parts` contiguous single-column partitions.
pub fn int_range_partitions(name: &str, n: i64, parts: usize) -> Vec<Table> {
    let chunk = (n as usize).div_ceil(parts.max(1)).max(1);
    (0..n)
        .collect::<Vec<_>>()
        .chunks(chunk)
        .map(|c| int_table(name, c.iter().copied()))
        .collect()
}

fn render_rows(table: &Table) -> Vec<Vec<Datum>> {
    (0..table.len())
        .map(|row| {
            table
                .columns()
                .iter()
                .map(|c| c.get(row).clone())
                .collect()
        })
        .collect()
}

fn describe(table: &Table) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "schema: {}", table.schema());
    for row in render_rows(table) {
        let _ = writeln!(out, "  {row:?}");
    }
    out
}

/// Assert that two tables have the same schema and identical rows in
/// identical order.
///
/// # Panics
/// Panics with a row-by-row rendering of both tables if they differ.
pub fn assert_tables_equal(actual: &Table, expected: &Table) {
    assert_eq!(
        actual.schema(),
        expected.schema(),
        "schema mismatch:\n  actual: {}\n  expected: {}",
        actual.schema(),
        expected.schema()
    );
    assert_eq!(
        render_rows(actual),
        render_rows(expected),
        "row mismatch:\nactual:\n{}expected:\n{}",
        describe(actual),
        describe(expected)
    );
}

/// Assert that two tables hold the same multiset of rows, ignoring row
/// order. Column names must match in order.
///
/// # Panics
/// Panics with a rendering of both tables if they differ.
pub fn assert_rows_unordered_equal(actual: &Table, expected: &Table) {
    let (actual_schema, expected_schema) = (actual.schema(), expected.schema());
    let actual_names = actual_schema.names();
    let expected_names = expected_schema.names();
    assert_eq!(
        actual_names, expected_names,
        "column mismatch:\n  actual: {actual_names:?}\n  expected: {expected_names:?}"
    );
    let mut a = render_rows(actual);
    let mut e = render_rows(expected);
    a.sort();
    e.sort();
    assert_eq!(
        a,
        e,
        "row multiset mismatch:\nactual:\n{}expected:\n{}",
        describe(actual),
        describe(expected)
    );
}
