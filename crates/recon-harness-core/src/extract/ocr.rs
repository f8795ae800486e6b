//! OCR extractor: rebuilds tables from the flat analysis block graph.
//!
//! Output order:
//!
//! 1. One fragment per `LINE` block, in block order, tagged with its page.
//! 2. For each `TABLE` block (numbered from 1 in block order), rows in
//!    ascending row index. Each row fragment (`"A | B"`) is followed by the
//!    cell fragments of that row in ascending column order.
//!
//! Relationship edges pointing at unknown ids are skipped, so a cell whose
//! words are missing produces an empty string rather than an error.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::analysis::{AnalysisResponse, Block, BlockType};
use crate::models::{meta, Fragment, MetadataBuilder};

/// Separator between cell texts in a row fragment.
pub const CELL_SEPARATOR: &str = " | ";

/// One reconstructed table cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCell {
    pub column: u32,
    pub text: String,
}

/// Cells of a table grouped by row index, columns ascending within a row.
pub type TableRows = BTreeMap<u32, Vec<TableCell>>;

pub fn extract_fragments(response: &AnalysisResponse, source_uri: &str) -> Vec<Fragment> {
    let by_id = response.index();
    let mut fragments = Vec::new();

    for block in response
        .blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Line)
    {
        let metadata = MetadataBuilder::new(source_uri)
            .with(meta::PAGE, page_value(block))
            .build();
        fragments.push(Fragment::new(
            block.text.clone().unwrap_or_default(),
            metadata,
        ));
    }

    let tables = response
        .blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Table);
    for (ordinal, table) in tables.enumerate() {
        let table_no = ordinal as u32 + 1;
        let page = page_value(table);

        for (row, cells) in reconstruct_table(table, &by_id) {
            let row_meta = MetadataBuilder::new(source_uri)
                .with(meta::PAGE, page.clone())
                .with(meta::TABLE, table_no)
                .with(meta::ROW, row);

            let row_text = cells
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(CELL_SEPARATOR);
            fragments.push(Fragment::new(row_text, row_meta.clone().build()));

            for cell in cells {
                let metadata = row_meta.clone().with(meta::COL, cell.column).build();
                fragments.push(Fragment::new(cell.text, metadata));
            }
        }
    }

    fragments
}

/// Group a table's `CELL` children by row index.
///
/// Cells without a row or column index are placed at index 0. Cells sharing
/// a `(row, column)` position are all kept, in block order.
pub fn reconstruct_table(table: &Block, by_id: &HashMap<&str, &Block>) -> TableRows {
    let mut rows = TableRows::new();
    for cell in table
        .child_ids()
        .filter_map(|id| by_id.get(id).copied())
        .filter(|b| b.block_type == BlockType::Cell)
    {
        rows.entry(cell.row_index.unwrap_or(0))
            .or_default()
            .push(TableCell {
                column: cell.column_index.unwrap_or(0),
                text: cell_text(cell, by_id),
            });
    }
    for cells in rows.values_mut() {
        cells.sort_by_key(|c| c.column);
    }
    rows
}

/// Space-joined text of a cell's `WORD`/`LINE` children, trimmed.
pub fn cell_text(cell: &Block, by_id: &HashMap<&str, &Block>) -> String {
    let words: Vec<&str> = cell
        .child_ids()
        .filter_map(|id| by_id.get(id))
        .filter(|b| matches!(b.block_type, BlockType::Word | BlockType::Line))
        .filter_map(|b| b.text.as_deref())
        .collect();
    words.join(" ").trim().to_string()
}

fn page_value(block: &Block) -> Value {
    block.page.map(Value::from).unwrap_or(Value::Null)
}
