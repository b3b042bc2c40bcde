//! Contact roster ingestion: decode, validate, expand.
//!
//! A roster arrives as one spreadsheet or CSV file and leaves this module
//! as an immutable `Vec<Contact>` with every message template already
//! expanded. Validation is all-or-nothing: a single malformed row rejects
//! the whole file before any send is attempted.

use crate::template;
use calamine::{Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

/// One raw row of the imported table, keyed by column header.
pub type Record = BTreeMap<String, String>;

/// Columns every roster must carry, by exact header match.
pub const REQUIRED_COLUMNS: [&str; 3] = ["Phone Number", "Name", "Custom Message"];

/// A validated, expansion-complete contact. Immutable once built.
///
/// Serialized field names keep the spreadsheet column headers so the wire
/// payload of `startSending` is exactly the imported rows plus the
/// processed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "Phone Number")]
    pub phone: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Custom Message", default)]
    pub message: String,
    #[serde(rename = "Processed Message", default)]
    pub processed_message: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Contact {
    /// The label used in outcome strings: the display name when present,
    /// the phone number otherwise.
    pub fn label(&self) -> &str {
        if self.name.is_empty() { &self.phone } else { &self.name }
    }

    fn from_record(mut record: Record) -> Self {
        let phone = record.remove("Phone Number").unwrap_or_default();
        let name = record.remove("Name").unwrap_or_default();
        let message = record.remove("Custom Message").unwrap_or_default();

        // Expansion sees every column of the row, including the ones we
        // just lifted out into named fields.
        let mut fields = record.clone();
        fields.insert("Phone Number".into(), phone.clone());
        fields.insert("Name".into(), name.clone());
        fields.insert("Custom Message".into(), message.clone());
        let processed_message = template::expand(&message, &fields);

        Self { phone, name, message, processed_message, extra: record }
    }
}

/// Why a roster file was rejected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("File is empty or could not be parsed.")]
    EmptyTable,
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Invalid or missing phone numbers found in {0} row(s).")]
    InvalidPhones(usize),
    #[error("Unsupported file type: .{0} — upload .xlsx, .xls, or .csv")]
    UnsupportedExtension(String),
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Workbook parse error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Structural table problems are validation errors; anything else is a
    /// decode or I/O failure. The gateway uses this to pick the event kind.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestError::EmptyTable | IngestError::MissingColumns(_) | IngestError::InvalidPhones(_)
        )
    }
}

/// Full ingestion pipeline: decode by extension, validate, expand.
pub fn ingest(file_name: &str, bytes: &[u8]) -> Result<Vec<Contact>, IngestError> {
    let records = decode_records(file_name, bytes)?;
    validate(&records)?;
    Ok(contacts_from_records(records))
}

/// Turn already-validated records into expansion-complete contacts.
pub fn contacts_from_records(records: Vec<Record>) -> Vec<Contact> {
    records.into_iter().map(Contact::from_record).collect()
}

/// Ingest directly from a file on disk.
pub fn load_file(path: &Path) -> Result<Vec<Contact>, IngestError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;
    ingest(&file_name, &bytes)
}

/// Decode a raw file into header-keyed records, picking the parser from
/// the file extension.
pub fn decode_records(file_name: &str, bytes: &[u8]) -> Result<Vec<Record>, IngestError> {
    match extension(file_name).as_str() {
        "csv" => decode_csv(bytes),
        "xlsx" | "xls" => decode_workbook(bytes),
        other => Err(IngestError::UnsupportedExtension(other.to_string())),
    }
}

/// Reject a table that is unusable as a whole: empty, missing a required
/// column, or carrying rows without a numeric-format phone number.
pub fn validate(records: &[Record]) -> Result<(), IngestError> {
    let Some(first) = records.first() else {
        return Err(IngestError::EmptyTable);
    };

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !first.contains_key(**col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing));
    }

    let invalid = records
        .iter()
        .filter(|r| !is_valid_phone(r.get("Phone Number").map(String::as_str).unwrap_or("")))
        .count();
    if invalid > 0 {
        return Err(IngestError::InvalidPhones(invalid));
    }

    Ok(())
}

/// Numeric-format check: an optional leading `+`, then digits only.
pub fn is_valid_phone(raw: &str) -> bool {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn extension(file_name: &str) -> String {
    file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase()
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<Record>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let record: Record = headers
            .iter()
            .cloned()
            .zip(row.iter().map(|f| f.to_string()).chain(std::iter::repeat(String::new())))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn decode_workbook(bytes: &[u8]) -> Result<Vec<Record>, IngestError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(IngestError::EmptyTable)??;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|c| cell_text(c).trim().to_string()).collect(),
        None => return Err(IngestError::EmptyTable),
    };

    let mut records = Vec::new();
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let record: Record = headers
            .iter()
            .cloned()
            .zip(row.iter().map(cell_text).chain(std::iter::repeat(String::new())))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Render a workbook cell as the string the operator saw in the sheet.
/// Whole-number floats lose the spurious `.0` so phone columns survive
/// Excel's numeric coercion.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}
