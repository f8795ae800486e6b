//! Tabular extractor: one fragment per spreadsheet row.
//!
//! A workbook is first read into a sparse [`GridSheet`] (cells keyed by
//! 1-based row number and 0-based column), then framed into a dense
//! [`Sheet`]: the first row becomes the header, later rows are indexed from
//! 0, and gaps between row numbers are filled with all-null rows so row
//! indices stay continuous.
//!
//! Each row's non-null values are serialized as a JSON object keyed by
//! column name. Rows with no values still produce a fragment (`{}`).

use serde_json::{Map, Number, Value};

use crate::error::ExtractError;
use crate::models::{meta, Fragment, Metadata, MetadataBuilder};
use crate::ooxml;

use super::TabularFormat;

/// Sheet name given to the single sheet of a CSV file.
pub const CSV_SHEET_NAME: &str = "Sheet1";

/// Upper bound on the dense size (columns x rows, gap rows included) of one
/// framed sheet.
pub const MAX_CELLS_PER_SHEET: usize = 2_000_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// One data row, one value per column (`Null` for empty cells).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Sparse sheet contents as read from the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSheet {
    pub name: String,
    pub rows: Vec<GridRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// 1-based row number.
    pub number: u32,
    /// `(column index, value)` for non-empty cells.
    pub cells: Vec<(usize, Value)>,
}

/// Where tabular fragments point back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularSource {
    /// Folder-level pointer to the batch's incoming area.
    pub folder_uri: String,
    /// The exact stored object.
    pub file_uri: String,
}

impl Workbook {
    pub fn from_grid(grids: Vec<GridSheet>) -> Result<Self, ExtractError> {
        Ok(Self {
            sheets: grids
                .into_iter()
                .map(Sheet::from_grid)
                .collect::<Result<_, _>>()?,
        })
    }

    /// Sheet by name, or the first sheet when `name` is `None`.
    pub fn sheet(&self, name: Option<&str>) -> Option<&Sheet> {
        match name {
            Some(name) => self.sheets.iter().find(|s| s.name == name),
            None => self.sheets.first(),
        }
    }
}

impl Sheet {
    fn from_grid(grid: GridSheet) -> Result<Self, ExtractError> {
        let width = grid
            .rows
            .iter()
            .flat_map(|r| r.cells.iter().map(|(col, _)| col + 1))
            .max()
            .unwrap_or(0);
        check_dense_size(&grid, width)?;

        let mut rows_iter = grid.rows.into_iter();
        let Some(header) = rows_iter.next() else {
            return Ok(Self {
                name: grid.name,
                columns: Vec::new(),
                rows: Vec::new(),
            });
        };

        let mut raw_names: Vec<Option<String>> = vec![None; width];
        for (col, value) in header.cells {
            raw_names[col] = header_name(&value);
        }
        let columns = dedupe_columns(
            raw_names
                .into_iter()
                .enumerate()
                .map(|(col, name)| name.unwrap_or_else(|| format!("Unnamed: {}", col)))
                .collect(),
        );

        let mut rows: Vec<Row> = Vec::new();
        for grid_row in rows_iter {
            let index = grid_row.number.saturating_sub(header.number + 1) as usize;
            while rows.len() < index {
                rows.push(Row::empty(width));
            }
            let mut row = Row::empty(width);
            for (col, value) in grid_row.cells {
                row.values[col] = value;
            }
            rows.push(row);
        }

        Ok(Self {
            name: grid.name,
            columns,
            rows,
        })
    }

    /// Column name to value for the row at `index`, nulls included.
    pub fn row_values(&self, index: usize) -> Option<Metadata> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.values.iter().cloned())
                .collect(),
        )
    }
}

impl Row {
    fn empty(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
        }
    }
}

/// Reject sheets whose framed form would exceed [`MAX_CELLS_PER_SHEET`].
fn check_dense_size(grid: &GridSheet, width: usize) -> Result<(), ExtractError> {
    let Some(header) = grid.rows.first() else {
        return Ok(());
    };
    let data_rows = grid.rows[1..]
        .iter()
        .map(|r| r.number.saturating_sub(header.number) as usize)
        .max()
        .unwrap_or(0)
        .max(grid.rows.len() - 1);
    let cells = width
        .max(1)
        .checked_mul(data_rows.max(1))
        .unwrap_or(usize::MAX);
    if cells > MAX_CELLS_PER_SHEET {
        return Err(ExtractError::SheetTooLarge {
            sheet: grid.name.clone(),
            limit: MAX_CELLS_PER_SHEET,
        });
    }
    Ok(())
}

fn header_name(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Suffix repeated names `.1`, `.2`, ... skipping names already taken.
fn dedupe_columns(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
            continue;
        }
        let mut n = 1;
        while out.contains(&format!("{}.{}", name, n)) {
            n += 1;
        }
        out.push(format!("{}.{}", name, n));
    }
    out
}

/// JSON value for a numeric cell: integral values become integers.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Typed value for a CSV field. Empty fields are null.
fn csv_value(field: &str) -> Value {
    if field.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = field.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = field.parse::<f64>() {
        if f.is_finite() {
            return number_value(f);
        }
    }
    match field {
        "True" | "TRUE" | "true" => Value::Bool(true),
        "False" | "FALSE" | "false" => Value::Bool(false),
        _ => Value::String(field.to_string()),
    }
}

/// Read a CSV file as a single sheet named [`CSV_SHEET_NAME`].
pub fn parse_csv(bytes: &[u8]) -> Result<Workbook, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = GridSheet {
        name: CSV_SHEET_NAME.to_string(),
        rows: Vec::new(),
    };
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // Header cells are names, never typed.
        let cells = record
            .iter()
            .enumerate()
            .map(|(col, field)| match idx {
                0 if !field.is_empty() => (col, Value::String(field.to_string())),
                _ => (col, csv_value(field)),
            })
            .filter(|(_, v)| !v.is_null())
            .collect();
        grid.rows.push(GridRow {
            number: idx as u32 + 1,
            cells,
        });
    }
    Workbook::from_grid(vec![grid])
}

/// Parse workbook bytes in the given format.
///
/// `.xls` files are accepted only when they are OOXML archives; the legacy
/// binary format is reported as unsupported.
pub fn parse(bytes: &[u8], format: TabularFormat) -> Result<Workbook, ExtractError> {
    match format {
        TabularFormat::Csv => parse_csv(bytes),
        TabularFormat::Xlsx => ooxml::xlsx::parse_workbook(bytes),
        TabularFormat::Xls if ooxml::is_zip(bytes) => ooxml::xlsx::parse_workbook(bytes),
        TabularFormat::Xls => Err(ExtractError::UnsupportedFormat(
            "legacy binary .xls workbook".to_string(),
        )),
    }
}

pub fn extract_fragments(workbook: &Workbook, source: &TabularSource) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    for sheet in &workbook.sheets {
        for (idx, row) in sheet.rows.iter().enumerate() {
            let present: Map<String, Value> = sheet
                .columns
                .iter()
                .zip(&row.values)
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let text = Value::Object(present).to_string();
            let metadata = MetadataBuilder::new(&source.folder_uri)
                .with(meta::SOURCE_FILE, source.file_uri.as_str())
                .with(meta::SHEET, sheet.name.as_str())
                .with(meta::ROW, idx as u64)
                .build();
            fragments.push(Fragment::new(text, metadata));
        }
    }
    fragments
}
