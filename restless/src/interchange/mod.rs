use crate::error::{Result, StoreError};
use crate::record::{Collections, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Prefix of the line that opens a collection's section in a CSV export.
pub const COLLECTION_MARKER: &str = "# Collection:";

/// Text formats a collections map can be exported to and imported from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeFormat {
    #[default]
    Json,
    Csv,
}

pub fn export(collections: &Collections, format: ExchangeFormat) -> Result<String> {
    match format {
        ExchangeFormat::Json => export_json(collections),
        ExchangeFormat::Csv => export_csv(collections),
    }
}

pub fn import(content: &str, format: ExchangeFormat) -> Result<Collections> {
    match format {
        ExchangeFormat::Json => import_json(content),
        ExchangeFormat::Csv => import_csv(content),
    }
}

pub fn export_json(collections: &Collections) -> Result<String> {
    Ok(serde_json::to_string_pretty(collections)?)
}

pub fn import_json(content: &str) -> Result<Collections> {
    Ok(serde_json::from_str(content)?)
}

/// Write every collection as a CSV section:
///
/// ```text
/// # Collection: productos
/// id,nombre,precio
/// 1,Laptop,1200
/// ```
///
/// The header is the union of the records' fields in first-seen order. Null
/// and missing values are empty cells; objects and arrays are compact JSON.
pub fn export_csv(collections: &Collections) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for (name, records) in collections {
        writer.write_record([format!("{COLLECTION_MARKER} {name}")])?;
        if records.is_empty() {
            continue;
        }

        let mut headers: Vec<&str> = Vec::new();
        for field in records.iter().flat_map(|r| r.keys()) {
            if !headers.contains(&field.as_str()) {
                headers.push(field);
            }
        }
        writer.write_record(&headers)?;

        for record in records {
            writer.write_record(headers.iter().map(|h| cell(record.get(*h))))?;
        }
    }

    let bytes = writer.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Other(format!("CSV export is not UTF-8: {e}")))
}

/// Read the format written by [`export_csv`]. Cells are re-typed: `true` and
/// `false` become booleans, numeric text becomes a number, text starting with
/// `{` or `[` that parses as JSON becomes that value. Empty cells leave the
/// field out of the record.
pub fn import_csv(content: &str) -> Result<Collections> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut collections = Collections::new();
    let mut current: Option<(String, Option<Vec<String>>)> = None;

    for (line, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() == 1 {
            if let Some(name) = row[0].strip_prefix(COLLECTION_MARKER) {
                let name = name.trim().to_string();
                collections.entry(name.clone()).or_default();
                current = Some((name, None));
                continue;
            }
        }

        let Some((name, headers)) = current.as_mut() else {
            return Err(StoreError::Other(format!(
                "CSV line {} comes before any '{COLLECTION_MARKER}' line",
                line + 1
            )));
        };
        match headers {
            None => *headers = Some(row.iter().map(|h| h.trim().to_string()).collect()),
            Some(headers) => {
                let record: Record = headers
                    .iter()
                    .zip(row.iter())
                    .filter(|(_, raw)| !raw.is_empty())
                    .map(|(field, raw)| (field.clone(), retype(raw)))
                    .collect();
                collections.entry(name.clone()).or_default().push(record);
            }
        }
    }

    Ok(collections)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn retype(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(value) = serde_json::from_str(raw) {
            return value;
        }
    }
    Value::String(raw.to_string())
}
