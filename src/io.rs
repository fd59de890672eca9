//! File I/O for scans and writes.
//!
//! The `ReadFile` and `WriteFile` instructions go through here. The reader
//! infers column types (int64, then float64, then bool, then utf8; empty
//! cells are null), so a round-tripped table keeps its shape without a
//! schema catalog. Scan paths may be glob patterns; expansion is sorted
//! for a deterministic partition layout.

use anyhow::{Context, Result, bail};
use glob::glob;

#[cfg(feature = "io-csv")]
pub use self::csv_io::{read_csv_table, write_csv_table};

/// Expand a glob pattern into a sorted list of matching file paths.
///
/// # Errors
/// Errors on an invalid pattern, an unreadable directory entry, or when
/// nothing matches — a scan over zero files is almost always a typo'd
/// path, and failing early beats an empty dataframe.
pub fn expand_paths(pattern: &str) -> Result<Vec<String>> {
    let entries = glob(pattern).with_context(|| format!("invalid glob pattern {pattern}"))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("read dir entry for {pattern}"))?;
        if path.is_file() {
            paths.push(path.display().to_string());
        }
    }
    if paths.is_empty() {
        bail!("no files match {pattern}");
    }
    paths.sort();
    Ok(paths)
}

#[cfg(feature = "io-csv")]
mod csv_io {
    use crate::series::{DataType, Datum, Series};
    use crate::table::Table;
    use anyhow::{Context, Result, ensure};
    use std::fs::{File, create_dir_all};
    use std::path::Path;

    /// Read a CSV file (with headers) into a [`Table`], inferring column
    /// types.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or a record fails to
    /// parse; errors are annotated with row numbers.
    pub fn read_csv_table(path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(f);

        let headers: Vec<String> = rdr
            .headers()
            .with_context(|| format!("read CSV header of {}", path.display()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (i, record) in rdr.records().enumerate() {
            let record = record
                .with_context(|| format!("parse CSV record #{} of {}", i + 1, path.display()))?;
            ensure!(
                record.len() == headers.len(),
                "CSV record #{} of {} has {} fields, expected {}",
                i + 1,
                path.display(),
                record.len(),
                headers.len()
            );
            for (col, field) in record.iter().enumerate() {
                cells[col].push(field.to_string());
            }
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, raw)| infer_series(name, &raw))
            .collect();
        Table::from_columns(columns)
    }

    /// Pick the narrowest type every non-empty cell parses as.
    fn infer_series(name: String, raw: &[String]) -> Series {
        let dtype = infer_dtype(raw);
        let values = raw
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    return Datum::Null;
                }
                match dtype {
                    DataType::Int64 => Datum::Int(cell.parse().unwrap()),
                    DataType::Float64 => Datum::float(cell.parse().unwrap()),
                    DataType::Bool => Datum::Bool(cell == "true"),
                    _ => Datum::Utf8(cell.clone()),
                }
            })
            .collect();
        Series::new(name, values)
    }

    fn infer_dtype(raw: &[String]) -> DataType {
        let non_empty = || raw.iter().filter(|c| !c.is_empty());
        if non_empty().count() == 0 {
            return DataType::Null;
        }
        if non_empty().all(|c| c.parse::<i64>().is_ok()) {
            return DataType::Int64;
        }
        if non_empty().all(|c| c.parse::<f64>().is_ok()) {
            return DataType::Float64;
        }
        if non_empty().all(|c| c == "true" || c == "false") {
            return DataType::Bool;
        }
        DataType::Utf8
    }

    /// Write a [`Table`] as a CSV file with headers, creating parent
    /// directories as needed. Nulls become empty cells.
    ///
    /// # Errors
    /// Returns an error if the directories or file cannot be created or a
    /// row fails to serialize.
    pub fn write_csv_table(table: &Table, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut wtr = csv::WriterBuilder::new().from_writer(f);

        let names: Vec<&str> = table.columns().iter().map(Series::name).collect();
        wtr.write_record(&names)
            .with_context(|| format!("write CSV header to {}", path.display()))?;
        for row in 0..table.len() {
            let record: Vec<String> = table
                .columns()
                .iter()
                .map(|c| c.get(row).to_string())
                .collect();
            wtr.write_record(&record)
                .with_context(|| format!("write CSV record #{} to {}", row + 1, path.display()))?;
        }
        wtr.flush()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(())
    }
}
