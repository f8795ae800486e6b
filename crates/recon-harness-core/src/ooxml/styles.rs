//! Cell number formats from `xl/styles.xml`, reduced to what value decoding
//! needs: which cell styles render a serial number as a date or a time.
//!
//! A cell's `s` attribute indexes `cellXfs`; each `xf` names a `numFmtId`
//! that is either built in (14-22 and 45-47 are dates and times) or defined
//! by a `numFmt` element with a format code.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use quick_xml::events::Event;
use serde_json::Value;

use crate::error::ExtractError;
use crate::extract::tabular::number_value;

use super::attribute;

/// Serial number of 9999-12-31 in the 1900 date system.
const MAX_SERIAL: f64 = 2_958_465.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date,
    Time,
}

/// Date/time classification of every cell style in a workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellFormats {
    styles: Vec<Option<Temporal>>,
    /// Serials count from 1904-01-01 instead of 1900-01-00.
    pub date1904: bool,
}

impl CellFormats {
    /// A workbook without a styles part: every number stays a number.
    pub fn unstyled(date1904: bool) -> Self {
        Self {
            styles: Vec::new(),
            date1904,
        }
    }

    pub fn parse(xml: &[u8], date1904: bool) -> Result<Self, ExtractError> {
        let mut custom: HashMap<u32, String> = HashMap::new();
        let mut xf_formats: Vec<u32> = Vec::new();
        let mut in_cell_xfs = false;

        let mut reader = quick_xml::Reader::from_reader(xml);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"cellXfs" => {
                    in_cell_xfs = true;
                }
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"numFmt" => {
                        let id = attribute(&e, b"numFmtId").and_then(|v| v.parse().ok());
                        if let (Some(id), Some(code)) = (id, attribute(&e, b"formatCode")) {
                            custom.insert(id, code);
                        }
                    }
                    b"xf" if in_cell_xfs => xf_formats.push(
                        attribute(&e, b"numFmtId")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0),
                    ),
                    _ => {}
                },
                Ok(Event::End(e)) if e.local_name().as_ref() == b"cellXfs" => {
                    in_cell_xfs = false;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }

        let styles = xf_formats
            .into_iter()
            .map(|id| match custom.get(&id) {
                Some(code) => classify_format_code(code),
                None => builtin_format(id),
            })
            .collect();
        Ok(Self { styles, date1904 })
    }

    pub fn temporal(&self, style: usize) -> Option<Temporal> {
        self.styles.get(style).copied().flatten()
    }

    /// Value of a numeric cell with style `style`.
    pub fn numeric_value(&self, style: Option<usize>, n: f64) -> Value {
        match style.and_then(|s| self.temporal(s)) {
            Some(kind) => serial_to_value(n, kind, self.date1904),
            None => number_value(n),
        }
    }
}

fn builtin_format(id: u32) -> Option<Temporal> {
    match id {
        14..=17 | 22 => Some(Temporal::Date),
        18..=21 | 45..=47 => Some(Temporal::Time),
        _ => None,
    }
}

/// Classify a custom format code by its date and time tokens, ignoring
/// quoted literals, bracketed sections (`[Red]`, `[$-409]`) and escapes.
pub fn classify_format_code(code: &str) -> Option<Temporal> {
    let mut tokens = String::new();
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for q in chars.by_ref() {
                    if q == '"' {
                        break;
                    }
                }
            }
            '[' => {
                for q in chars.by_ref() {
                    if q == ']' {
                        break;
                    }
                }
            }
            '\\' | '_' | '*' => {
                chars.next();
            }
            c => tokens.push(c.to_ascii_lowercase()),
        }
    }
    if tokens.contains('d') || tokens.contains('y') {
        Some(Temporal::Date)
    } else if tokens.contains('h') || tokens.contains('s') {
        Some(Temporal::Time)
    } else {
        None
    }
}

/// ISO 8601 text for a date/time serial: `2024-03-31` for whole-day dates,
/// `2024-03-31T08:30:00` when a time part is present, `08:30:00` for pure
/// times. Serials outside the calendar stay numbers.
pub fn serial_to_value(serial: f64, kind: Temporal, date1904: bool) -> Value {
    if !serial.is_finite() || serial < 0.0 || serial > MAX_SERIAL {
        return number_value(serial);
    }
    let mut days = serial.floor() as i64;
    let mut seconds = ((serial - serial.floor()) * 86_400.0).round() as i64;
    if seconds == 86_400 {
        days += 1;
        seconds = 0;
    }
    let time = format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    );
    if kind == Temporal::Time && days == 0 {
        return Value::String(time);
    }

    // The 1900 system counts a nonexistent 1900-02-29 as serial 60.
    let epoch = match (date1904, days < 60) {
        (true, _) => NaiveDate::from_ymd_opt(1904, 1, 1),
        (false, true) => NaiveDate::from_ymd_opt(1899, 12, 31),
        (false, false) => NaiveDate::from_ymd_opt(1899, 12, 30),
    };
    let Some(date) = epoch.and_then(|e| e.checked_add_signed(Duration::days(days))) else {
        return number_value(serial);
    };
    if seconds == 0 && kind == Temporal::Date {
        Value::String(date.format("%Y-%m-%d").to_string())
    } else {
        Value::String(format!("{}T{}", date.format("%Y-%m-%d"), time))
    }
}
