//! Plain-text fallback: one fragment per detected `LINE` block.
//!
//! Fragments carry only `source_uri`, even though the analysis service
//! reports a page per line.

use crate::analysis::{AnalysisResponse, BlockType};
use crate::models::{Fragment, MetadataBuilder};

pub fn extract_fragments(response: &AnalysisResponse, source_uri: &str) -> Vec<Fragment> {
    response
        .blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Line)
        .map(|b| {
            Fragment::new(
                b.text.clone().unwrap_or_default(),
                MetadataBuilder::new(source_uri).build(),
            )
        })
        .collect()
}
