//! Format-specific extractors.
//!
//! Every extractor is a pure function from a parsed document to an ordered
//! `Vec<Fragment>` in reading order. Parsing bytes into the document shapes
//! lives next to each extractor (`slides::parse`, `tabular::parse`); the
//! analysis-backed extractors take an [`crate::analysis::AnalysisResponse`].
//!
//! | Extension | Kind | Extractor |
//! |-----------|------|-----------|
//! | `pdf`, `png`, `jpg`, `jpeg` | [`FileKind::Ocr`] | [`ocr`] |
//! | `pptx` | [`FileKind::Slides`] | [`slides`] |
//! | `xls`, `xlsx`, `csv` | [`FileKind::Tabular`] | [`tabular`] |
//! | anything else | [`FileKind::PlainText`] | [`lines`] |

pub mod lines;
pub mod ocr;
pub mod slides;
pub mod tabular;

use serde::{Deserialize, Serialize};

/// Spreadsheet container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabularFormat {
    Xlsx,
    Xls,
    Csv,
}

impl TabularFormat {
    /// Format from a filename or object key, by extension.
    pub fn from_key(key: &str) -> Option<Self> {
        match extension(key).as_deref() {
            Some("xlsx") => Some(TabularFormat::Xlsx),
            Some("xls") => Some(TabularFormat::Xls),
            Some("csv") => Some(TabularFormat::Csv),
            _ => None,
        }
    }
}

/// Extractor family selected for an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Ocr,
    Slides,
    Tabular(TabularFormat),
    PlainText,
}

impl FileKind {
    /// Dispatch on the lowercased filename extension.
    pub fn from_filename(filename: &str) -> Self {
        match extension(filename).as_deref() {
            Some("pdf" | "png" | "jpg" | "jpeg") => FileKind::Ocr,
            Some("pptx") => FileKind::Slides,
            _ => match TabularFormat::from_key(filename) {
                Some(format) => FileKind::Tabular(format),
                None => FileKind::PlainText,
            },
        }
    }
}

/// Lowercased text after the last dot of the final path segment. A name
/// that is only an extension (`.csv`) still counts.
fn extension(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}
