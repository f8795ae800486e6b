//! `.xlsx` parsing into a [`Workbook`].
//!
//! Sheet names and order come from `xl/workbook.xml` and its
//! relationships; archives without a workbook part fall back to
//! `xl/worksheets/sheet<n>.xml` numbering with generated names. Cell values
//! are decoded by cell type (`s`, `inlineStr`, `str`, `b`, `e`, `d`, `n`);
//! numeric cells whose style carries a date or time format become ISO text
//! (see [`super::styles`]).

use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

use crate::error::ExtractError;
use crate::extract::tabular::{GridRow, GridSheet, Workbook};

use super::styles::CellFormats;
use super::{
    attribute, element_attributes, has_entry, numbered_parts, open_archive, read_part,
    read_relationships, relationship_id, Archive,
};

const WORKBOOK: &str = "xl/workbook.xml";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const STYLES: &str = "xl/styles.xml";
const SHEET_PREFIX: &str = "xl/worksheets/sheet";

/// Columns per worksheet (`A` through `XFD`).
pub const MAX_COLUMNS: usize = 16_384;
/// Rows per worksheet.
pub const MAX_ROWS: u32 = 1_048_576;

pub fn parse_workbook(bytes: &[u8]) -> Result<Workbook, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = if has_entry(&archive, SHARED_STRINGS) {
        let xml = read_part(&mut archive, SHARED_STRINGS)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let formats = cell_formats(&mut archive)?;

    let mut grids = Vec::new();
    for (name, path) in sheet_parts(&mut archive)? {
        let xml = read_part(&mut archive, &path)?;
        grids.push(GridSheet {
            name,
            rows: parse_sheet_rows(&xml, &shared, &formats)?,
        });
    }
    Workbook::from_grid(grids)
}

/// Number formats and the workbook's date system.
fn cell_formats(archive: &mut Archive<'_>) -> Result<CellFormats, ExtractError> {
    let date1904 = if has_entry(archive, WORKBOOK) {
        let xml = read_part(archive, WORKBOOK)?;
        element_attributes(&xml, b"workbookPr")?
            .first()
            .and_then(|attrs| attrs.get("date1904"))
            .is_some_and(|v| v == "1" || v == "true")
    } else {
        false
    };
    if !has_entry(archive, STYLES) {
        return Ok(CellFormats::unstyled(date1904));
    }
    let xml = read_part(archive, STYLES)?;
    CellFormats::parse(&xml, date1904)
}

/// `(sheet name, part path)` in workbook order.
fn sheet_parts(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    if has_entry(archive, WORKBOOK) {
        let xml = read_part(archive, WORKBOOK)?;
        let rels = read_relationships(archive, WORKBOOK)?;
        let mut parts = Vec::new();
        for attrs in element_attributes(&xml, b"sheet")? {
            let path = relationship_id(&attrs).and_then(|id| rels.get(id));
            if let (Some(name), Some(path)) = (attrs.get("name"), path) {
                if has_entry(archive, path) {
                    parts.push((name.clone(), path.clone()));
                }
            }
        }
        if !parts.is_empty() {
            return Ok(parts);
        }
    }
    Ok(numbered_parts(archive, SHEET_PREFIX)
        .into_iter()
        .enumerate()
        .map(|(i, path)| (format!("Sheet{}", i + 1), path))
        .collect())
}

/// Shared string table. Rich-text runs within one `si` are concatenated;
/// phonetic runs (`rPh`) are skipped.
pub fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// 0-based column index of a cell reference such as `AB12`. References
/// without column letters or beyond `XFD` are rejected.
pub fn column_index(cell_ref: &str) -> Result<usize, ExtractError> {
    let invalid = || ExtractError::Ooxml(format!("invalid cell reference: {:?}", cell_ref));
    let letters = cell_ref
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .collect::<Vec<u8>>();
    if letters.is_empty() {
        return Err(invalid());
    }
    let mut n = 0usize;
    for b in letters {
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|n| *n <= MAX_COLUMNS)
            .ok_or_else(invalid)?;
    }
    Ok(n - 1)
}

struct OpenCell {
    column: usize,
    kind: Option<String>,
    style: Option<usize>,
    text: String,
}

/// Non-empty cells of one worksheet, grouped by row.
///
/// Rows without an `r` attribute follow the previous row; cells without a
/// reference follow the previous cell. Rows that contain no values are
/// still returned. Rows past [`MAX_ROWS`] and columns past [`MAX_COLUMNS`]
/// are errors.
pub fn parse_sheet_rows(
    xml: &[u8],
    shared: &[String],
    formats: &CellFormats,
) -> Result<Vec<GridRow>, ExtractError> {
    let mut rows: Vec<GridRow> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut row: Option<GridRow> = None;
    let mut cell: Option<OpenCell> = None;
    let mut next_column = 0usize;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Some(open_row(&e, &rows)?);
                    next_column = 0;
                }
                b"c" => {
                    let open = open_cell(&e, next_column)?;
                    next_column = open.column + 1;
                    cell = Some(open);
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(open_row(&e, &rows)?),
                b"c" => next_column = open_cell(&e, next_column)?.column + 1,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.text.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                        let value = cell_value(&c, shared, formats);
                        if !value.is_null() {
                            r.cells.push((c.column, value));
                        }
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn open_row(e: &BytesStart<'_>, previous: &[GridRow]) -> Result<GridRow, ExtractError> {
    let number = attribute(e, b"r")
        .and_then(|r| r.parse::<u32>().ok())
        .unwrap_or_else(|| previous.last().map_or(1, |r| r.number.saturating_add(1)));
    if number == 0 || number > MAX_ROWS {
        return Err(ExtractError::Ooxml(format!("row number out of range: {}", number)));
    }
    Ok(GridRow {
        number,
        cells: Vec::new(),
    })
}

fn open_cell(e: &BytesStart<'_>, next_column: usize) -> Result<OpenCell, ExtractError> {
    let column = match attribute(e, b"r") {
        Some(r) => column_index(&r)?,
        None if next_column < MAX_COLUMNS => next_column,
        None => {
            return Err(ExtractError::Ooxml(format!(
                "more than {} columns in a row",
                MAX_COLUMNS
            )))
        }
    };
    Ok(OpenCell {
        column,
        kind: attribute(e, b"t"),
        style: attribute(e, b"s").and_then(|s| s.parse().ok()),
        text: String::new(),
    })
}

fn cell_value(cell: &OpenCell, shared: &[String], formats: &CellFormats) -> Value {
    let text = cell.text.as_str();
    if text.is_empty() {
        return Value::Null;
    }
    match cell.kind.as_deref() {
        Some("s") => text
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| Value::String(s.clone()))
            .unwrap_or(Value::Null),
        Some("b") => Value::Bool(text.trim() == "1"),
        Some("inlineStr") | Some("str") | Some("e") | Some("d") => Value::String(text.to_string()),
        _ => match text.trim().parse::<f64>() {
            Ok(n) => formats.numeric_value(cell.style, n),
            Err(_) => Value::String(text.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::testing::archive;
    use serde_json::json;

    const WORKBOOK_XML: &str = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>
        <sheet name="Bank" sheetId="1" r:id="rId2"/>
        <sheet name="Ledger" sheetId="2" r:id="rId1"/>
    </sheets></workbook>"#;

    const WORKBOOK_RELS: &str = r#"<Relationships>
        <Relationship Id="rId1" Target="worksheets/sheet1.xml"/>
        <Relationship Id="rId2" Target="worksheets/sheet2.xml"/>
        <Relationship Id="rId3" Target="sharedStrings.xml"/>
    </Relationships>"#;

    const SHARED: &str = r#"<sst><si><t>id</t></si><si><r><t>amo</t></r><r><t xml:space="preserve">unt</t></r></si><si><t>EUR</t><rPh><t>yuro</t></rPh></si><si/></sst>"#;

    const LEDGER: &str = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>0</v></c></row>
        <row r="2"><c r="A2"><v>1</v></c><c r="B2"><v>10.5</v></c><c r="C2" t="s"><v>2</v></c></row>
        <row r="4"><c r="B4" t="inlineStr"><is><t>pending</t></is></c><c r="C4" t="b"><v>1</v></c></row>
    </sheetData></worksheet>"#;

    const BANK: &str = r#"<worksheet><sheetData>
        <row r="1"><c r="A1" t="str"><v>ref</v></c></row>
        <row r="2"/>
        <row r="3"><c r="A3"><v>7</v></c></row>
    </sheetData></worksheet>"#;

    fn sample() -> Vec<u8> {
        archive(&[
            ("xl/workbook.xml", WORKBOOK_XML),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/sharedStrings.xml", SHARED),
            ("xl/worksheets/sheet1.xml", LEDGER),
            ("xl/worksheets/sheet2.xml", BANK),
        ])
    }

    #[test]
    fn shared_strings_concatenate_runs_and_skip_phonetics() {
        assert_eq!(
            read_shared_strings(SHARED.as_bytes()).unwrap(),
            vec!["id", "amount", "EUR", ""]
        );
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_index("A1").unwrap(), 0);
        assert_eq!(column_index("Z9").unwrap(), 25);
        assert_eq!(column_index("AB12").unwrap(), 27);
        assert_eq!(column_index("XFD1").unwrap(), MAX_COLUMNS - 1);
        assert!(column_index("12").is_err());
    }

    #[test]
    fn out_of_range_columns_are_rejected() {
        assert!(matches!(column_index("XFE1"), Err(ExtractError::Ooxml(_))));
        assert!(matches!(column_index("ZZZZZZ1"), Err(ExtractError::Ooxml(_))));
        // Long enough to overflow a naive base-26 fold.
        assert!(matches!(
            column_index("ZZZZZZZZZZZZZZZZZZZZ1"),
            Err(ExtractError::Ooxml(_))
        ));

        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1"><v>1</v></c><c r="XFE1"><v>2</v></c></row>
        </sheetData></worksheet>"#;
        let err = parse_sheet_rows(sheet.as_bytes(), &[], &CellFormats::default()).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));

        let far_row = r#"<worksheet><sheetData>
            <row r="1048577"><c r="A1048577"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        assert!(parse_sheet_rows(far_row.as_bytes(), &[], &CellFormats::default()).is_err());
    }

    #[test]
    fn sparse_far_corner_is_too_large() {
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>id</t></is></c></row>
            <row r="1048576"><c r="XFD1048576"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = archive(&[("xl/worksheets/sheet1.xml", sheet)]);
        let err = parse_workbook(&bytes).unwrap_err();
        assert!(matches!(err, ExtractError::SheetTooLarge { .. }));
    }

    #[test]
    fn date_styled_cells_become_iso_dates() {
        let styles = r#"<styleSheet>
            <numFmts><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts>
            <cellXfs><xf numFmtId="0"/><xf numFmtId="14"/><xf numFmtId="164"/></cellXfs>
        </styleSheet>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>posted</t></is></c><c r="B1" t="inlineStr"><is><t>value</t></is></c><c r="C1" t="inlineStr"><is><t>amount</t></is></c></row>
            <row r="2"><c r="A2" s="1"><v>45123</v></c><c r="B2" s="2"><v>45124.5</v></c><c r="C2" s="0"><v>45123</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = archive(&[
            ("xl/styles.xml", styles),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let wb = parse_workbook(&bytes).unwrap();
        let row = wb.sheets[0].row_values(0).unwrap();
        assert_eq!(row["posted"], json!("2023-07-16"));
        assert_eq!(row["value"], json!("2023-07-17T12:00:00"));
        assert_eq!(row["amount"], json!(45123));
    }

    #[test]
    fn date1904_workbooks_shift_the_epoch() {
        let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <workbookPr date1904="1"/>
            <sheets><sheet name="Dates" sheetId="1" r:id="rId1"/></sheets>
        </workbook>"#;
        let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#;
        let styles = r#"<styleSheet><cellXfs><xf numFmtId="0"/><xf numFmtId="14"/></cellXfs></styleSheet>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="inlineStr"><is><t>d</t></is></c></row>
            <row r="2"><c r="A2" s="1"><v>0</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = archive(&[
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/styles.xml", styles),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let wb = parse_workbook(&bytes).unwrap();
        assert_eq!(wb.sheet(Some("Dates")).unwrap().rows[0].values[0], json!("1904-01-01"));
    }

    #[test]
    fn workbook_order_names_and_values() {
        let wb = parse_workbook(&sample()).unwrap();
        let names: Vec<&str> = wb.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Bank", "Ledger"]);

        let ledger = wb.sheet(Some("Ledger")).unwrap();
        assert_eq!(ledger.columns, vec!["id", "amount", "id.1"]);
        assert_eq!(ledger.rows.len(), 3);
        assert_eq!(ledger.rows[0].values, vec![json!(1), json!(10.5), json!("EUR")]);
        assert!(ledger.rows[1].values.iter().all(Value::is_null));
        assert_eq!(
            ledger.rows[2].values,
            vec![Value::Null, json!("pending"), json!(true)]
        );

        let bank = wb.sheet(Some("Bank")).unwrap();
        assert_eq!(bank.columns, vec!["ref"]);
        assert_eq!(bank.rows.len(), 2);
        assert!(bank.rows[0].values[0].is_null());
        assert_eq!(bank.rows[1].values[0], json!(7));
    }

    #[test]
    fn falls_back_without_workbook_part() {
        let bytes = archive(&[
            ("xl/worksheets/sheet2.xml", BANK),
            ("xl/worksheets/sheet1.xml", LEDGER),
        ]);
        let wb = parse_workbook(&bytes).unwrap();
        assert_eq!(wb.sheets[0].name, "Sheet1");
        assert_eq!(wb.sheets[1].name, "Sheet2");
        assert_eq!(wb.sheets[1].columns, vec!["ref"]);
        // No shared string table: shared-string cells are empty.
        assert_eq!(wb.sheets[0].columns, vec!["Unnamed: 0", "Unnamed: 1", "Unnamed: 2"]);
    }
}
