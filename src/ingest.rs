//! Upload parsing.
//!
//! Turns uploaded CSV / Excel files into header -> value rows, keyed by the
//! role declared through the filename prefix (`Leads_data*`, `Services_data*`,
//! `PreAccount_data*`, `RunningAccout_data*`).

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::errors::AppError;
use crate::models::{FileRole, ParsedFile, Row};

/// Accepted alongside `RunningAccout_data`, which is the historical spelling.
const RUNNING_ACCOUNT_ALT_PREFIX: &str = "RunningAccount_data";

/// Infers the role from the filename prefix. Matching is exact and
/// case-sensitive; directories in the name are ignored.
pub fn detect_role(file_name: &str) -> Option<FileRole> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    if base.starts_with(RUNNING_ACCOUNT_ALT_PREFIX) {
        return Some(FileRole::RunningAccounts);
    }

    FileRole::ALL
        .into_iter()
        .find(|role| base.starts_with(role.prefix()))
}

/// Parses one uploaded file.
///
/// Returns `Ok(None)` for filenames without a recognized prefix; those are
/// logged and skipped rather than rejected.
pub fn parse_upload(file_name: &str, bytes: &[u8]) -> Result<Option<ParsedFile>, AppError> {
    let Some(role) = detect_role(file_name) else {
        tracing::warn!("Ignoring file with unrecognized prefix: {}", file_name);
        return Ok(None);
    };

    let rows = read_rows(file_name, bytes)?;
    tracing::info!(
        "✓ Parsed {} as {:?}: {} row(s)",
        file_name,
        role,
        rows.len()
    );

    Ok(Some(ParsedFile {
        role,
        file_name: file_name.to_string(),
        rows,
    }))
}

/// Reads rows, dispatching on the file extension. Anything that is not an
/// Excel workbook is read as CSV.
pub fn read_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<Row>, AppError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    if matches!(extension.as_str(), "xlsx" | "xlsm" | "xls" | "xlsb") {
        read_excel_rows(bytes)
    } else {
        read_csv_rows(bytes)
    }
}

fn read_csv_rows(bytes: &[u8]) -> Result<Vec<Row>, AppError> {
    // UTF-16 BOMs are not supported
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        return Err(AppError::ParseError(
            "UTF-16 encoded files are not supported, save as UTF-8".to_string(),
        ));
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::ParseError(format!("Unable to read headers: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(AppError::ParseError("File has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            AppError::ParseError(format!("Unable to read row {}: {}", line + 2, e))
        })?;
        let values: Vec<String> = record.iter().map(str::to_string).collect();
        if let Some(row) = zip_row(&headers, values) {
            rows.push(row);
        }
    }

    Ok(rows)
}

fn read_excel_rows(bytes: &[u8]) -> Result<Vec<Row>, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::ParseError(format!("Unable to open workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::ParseError("Workbook has no worksheets".to_string()))?
        .map_err(|e| AppError::ParseError(format!("Unable to read worksheet: {}", e)))?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(header) => header.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };

    if headers.iter().all(|h| h.is_empty()) {
        return Err(AppError::ParseError("File has no header row".to_string()));
    }

    Ok(sheet_rows
        .filter_map(|cells| zip_row(&headers, cells.iter().map(cell_to_string).collect()))
        .collect())
}

/// Pairs headers with values. Blank rows yield `None`; columns without a
/// header are dropped and missing trailing cells become empty strings.
fn zip_row(headers: &[String], values: Vec<String>) -> Option<Row> {
    if values.iter().all(|v| v.trim().is_empty()) {
        return None;
    }

    let mut row = Row::new();
    for (idx, header) in headers.iter().enumerate() {
        if header.is_empty() {
            continue;
        }
        let value = values.get(idx).cloned().unwrap_or_default();
        row.insert(header.clone(), value);
    }
    Some(row)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(n) => n.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => format!("{}", f),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR({:?})", e),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) => ts.date().to_string(),
            None => format!("{}", dt),
        },
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}
