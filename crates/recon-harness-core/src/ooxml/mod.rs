//! OOXML package access shared by the `.pptx` and `.xlsx` parsers.
//!
//! An OOXML file is a zip archive of XML parts linked by relationship
//! files (`_rels/*.rels`). Every part is read through
//! [`read_zip_entry_bounded`] so a crafted archive cannot decompress into
//! unbounded memory.

pub mod pptx;
pub mod styles;
pub mod xlsx;

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};

use crate::error::ExtractError;

/// Maximum decompressed bytes to read from a single zip entry.
pub const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// Whether `bytes` start with a zip local file header.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

pub fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    Ok(zip::ZipArchive::new(Cursor::new(bytes))?)
}

pub fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

pub fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::EntryTooLarge {
            name: name.to_string(),
            limit: max_bytes,
        });
    }
    Ok(out)
}

/// Read a part with the default size bound.
pub fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES)
}

/// Relationship file of a part: `ppt/presentation.xml` →
/// `ppt/_rels/presentation.xml.rels`.
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Relationship id → target path, resolved against `part`. A part without
/// a relationship file has no relationships.
pub fn read_relationships(
    archive: &mut Archive<'_>,
    part: &str,
) -> Result<HashMap<String, String>, ExtractError> {
    let rels_path = rels_path_for(part);
    if !has_entry(archive, &rels_path) {
        return Ok(HashMap::new());
    }
    let xml = read_part(archive, &rels_path)?;
    let mut rels = HashMap::new();
    for attrs in element_attributes(&xml, b"Relationship")? {
        if let (Some(id), Some(target)) = (attrs.get("Id"), attrs.get("Target")) {
            rels.insert(id.clone(), resolve_target(part, target));
        }
    }
    Ok(rels)
}

/// Resolve a relationship target relative to the directory of `base`.
pub fn resolve_target(base: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match base.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Attributes of every element with the given local name, in document
/// order. Keys are full qualified names (`r:id`, `name`).
pub fn element_attributes(
    xml: &[u8],
    local: &[u8],
) -> Result<Vec<HashMap<String, String>>, ExtractError> {
    let mut out = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == local => {
                out.push(attributes(&e)?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// All attributes of an element, unescaped, keyed by qualified name.
pub fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, ExtractError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

/// Value of one attribute by qualified name.
pub fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// The relationship-id attribute (`r:id` under any prefix).
pub fn relationship_id(attrs: &HashMap<String, String>) -> Option<&String> {
    attrs
        .iter()
        .find(|(k, _)| k.ends_with(":id"))
        .map(|(_, v)| v)
}

/// Entries matching `<prefix><n>.xml`, sorted by `n`.
pub fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter(|n| !n[prefix.len()..].contains('/'))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_and_absolute_targets() {
        assert_eq!(
            resolve_target("ppt/presentation.xml", "slides/slide2.xml"),
            "ppt/slides/slide2.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("ppt/slides/slide1.xml", "../media/image1.png"),
            "ppt/media/image1.png"
        );
    }

    #[test]
    fn rels_path_layout() {
        assert_eq!(
            rels_path_for("xl/workbook.xml"),
            "xl/_rels/workbook.xml.rels"
        );
    }

    #[test]
    fn reads_relationships_and_bounds_entries() {
        let bytes = testing::archive(&[
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
            ),
            ("xl/worksheets/sheet1.xml", "<worksheet/>"),
        ]);
        assert!(is_zip(&bytes));
        let mut archive = open_archive(&bytes).unwrap();
        let rels = read_relationships(&mut archive, "xl/workbook.xml").unwrap();
        assert_eq!(rels["rId1"], "xl/worksheets/sheet1.xml");

        let err = read_zip_entry_bounded(&mut archive, "xl/worksheets/sheet1.xml", 4).unwrap_err();
        assert!(matches!(err, ExtractError::EntryTooLarge { limit: 4, .. }));
    }

    #[test]
    fn not_a_zip_is_an_error() {
        assert!(!is_zip(b"id,amount\n"));
        assert!(matches!(
            open_archive(b"not a zip"),
            Err(ExtractError::Ooxml(_))
        ));
    }
}
