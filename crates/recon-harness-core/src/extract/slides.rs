//! Slide extractor: slide-level text plus table rows and cells.
//!
//! Per slide (1-based), tables are walked in shape order; each table cell
//! becomes a fragment tagged `slide`, `table`, `row`, `col`, and each row is
//! followed by a `" | "`-joined row fragment. Text from the remaining
//! shapes is collected and emitted last as one newline-joined fragment
//! tagged with `slide` only. A slide with neither yields nothing.

use crate::error::ExtractError;
use crate::models::{meta, Fragment, MetadataBuilder};
use crate::ooxml;

use super::ocr::CELL_SEPARATOR;

/// A parsed slide deck in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deck {
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slide {
    pub shapes: Vec<Shape>,
}

/// The parts of a shape the extractor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Text body, paragraphs separated by `\n`.
    Text(String),
    /// Table cell texts, row-major.
    Table(Vec<Vec<String>>),
}

/// Parse a `.pptx` archive.
pub fn parse(bytes: &[u8]) -> Result<Deck, ExtractError> {
    ooxml::pptx::parse_deck(bytes)
}

pub fn extract_fragments(deck: &Deck, source_uri: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();

    for (idx, slide) in deck.slides.iter().enumerate() {
        let slide_no = idx as u32 + 1;
        let mut text_blocks: Vec<&str> = Vec::new();
        let mut table_no = 0u32;

        for shape in &slide.shapes {
            match shape {
                Shape::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        text_blocks.push(text);
                    }
                }
                Shape::Table(rows) => {
                    table_no += 1;
                    for (r, row) in rows.iter().enumerate() {
                        let row_meta = MetadataBuilder::new(source_uri)
                            .with(meta::SLIDE, slide_no)
                            .with(meta::TABLE, table_no)
                            .with(meta::ROW, r as u32 + 1);

                        let mut cells = Vec::with_capacity(row.len());
                        for (c, cell) in row.iter().enumerate() {
                            let text = cell.trim();
                            cells.push(text);
                            let metadata = row_meta.clone().with(meta::COL, c as u32 + 1).build();
                            fragments.push(Fragment::new(text, metadata));
                        }
                        fragments.push(Fragment::new(
                            cells.join(CELL_SEPARATOR),
                            row_meta.build(),
                        ));
                    }
                }
            }
        }

        if !text_blocks.is_empty() {
            let metadata = MetadataBuilder::new(source_uri)
                .with(meta::SLIDE, slide_no)
                .build();
            fragments.push(Fragment::new(text_blocks.join("\n"), metadata));
        }
    }

    fragments
}
