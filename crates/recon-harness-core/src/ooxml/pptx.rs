//! `.pptx` parsing into a [`Deck`].
//!
//! Slide order comes from the `sldIdLst` of `ppt/presentation.xml`,
//! resolved through its relationships. Archives without a usable
//! presentation part fall back to `ppt/slides/slide<n>.xml` numbering.

use quick_xml::events::Event;

use crate::error::ExtractError;
use crate::extract::slides::{Deck, Shape, Slide};

use super::{
    element_attributes, has_entry, numbered_parts, open_archive, read_part, read_relationships,
    relationship_id, Archive,
};

const PRESENTATION: &str = "ppt/presentation.xml";
const SLIDE_PREFIX: &str = "ppt/slides/slide";

pub fn parse_deck(bytes: &[u8]) -> Result<Deck, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut deck = Deck::default();
    for path in slide_paths(&mut archive)? {
        let xml = read_part(&mut archive, &path)?;
        deck.slides.push(parse_slide(&xml)?);
    }
    Ok(deck)
}

fn slide_paths(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    if has_entry(archive, PRESENTATION) {
        let xml = read_part(archive, PRESENTATION)?;
        let rels = read_relationships(archive, PRESENTATION)?;
        let ordered: Vec<String> = element_attributes(&xml, b"sldId")?
            .iter()
            .filter_map(|attrs| relationship_id(attrs))
            .filter_map(|id| rels.get(id).cloned())
            .filter(|path| has_entry(archive, path))
            .collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    }
    Ok(numbered_parts(archive, SLIDE_PREFIX))
}

/// Shapes of one slide in tree order. Text bodies become
/// [`Shape::Text`] (paragraphs joined by `\n`); `a:tbl` graphic frames
/// become [`Shape::Table`].
pub fn parse_slide(xml: &[u8]) -> Result<Slide, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut state = SlideState::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sp" => state.shape = Some(Vec::new()),
                b"tbl" => state.table = Some(Vec::new()),
                b"tr" => state.row = Some(Vec::new()),
                b"tc" => state.cell = Some(Vec::new()),
                b"p" => state.paragraph = Some(String::new()),
                b"t" => state.in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => state.push_paragraph(String::new()),
                b"br" => state.push_text("\n"),
                b"tc" => {
                    if let Some(row) = state.row.as_mut() {
                        row.push(String::new());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if state.in_text => {
                state.push_text(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => state.in_text = false,
                b"p" => {
                    if let Some(p) = state.paragraph.take() {
                        state.push_paragraph(p);
                    }
                }
                b"tc" => {
                    if let (Some(cell), Some(row)) = (state.cell.take(), state.row.as_mut()) {
                        row.push(cell.join("\n"));
                    }
                }
                b"tr" => {
                    if let (Some(row), Some(table)) = (state.row.take(), state.table.as_mut()) {
                        table.push(row);
                    }
                }
                b"tbl" => {
                    if let Some(table) = state.table.take() {
                        state.slide.shapes.push(Shape::Table(table));
                    }
                }
                b"sp" => {
                    if let Some(paragraphs) = state.shape.take() {
                        state.slide.shapes.push(Shape::Text(paragraphs.join("\n")));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(state.slide)
}

#[derive(Default)]
struct SlideState {
    slide: Slide,
    /// Paragraphs of the open `p:sp`.
    shape: Option<Vec<String>>,
    table: Option<Vec<Vec<String>>>,
    row: Option<Vec<String>>,
    /// Paragraphs of the open `a:tc`.
    cell: Option<Vec<String>>,
    paragraph: Option<String>,
    in_text: bool,
}

impl SlideState {
    fn push_text(&mut self, text: &str) {
        if let Some(p) = self.paragraph.as_mut() {
            p.push_str(text);
        }
    }

    /// A finished paragraph goes to the innermost open cell or shape.
    fn push_paragraph(&mut self, paragraph: String) {
        if let Some(cell) = self.cell.as_mut() {
            cell.push(paragraph);
        } else if let Some(shape) = self.shape.as_mut() {
            shape.push(paragraph);
        }
    }
}
