//! services/csv_service.rs
//! Lectura del CSV de importación y escritura del CSV de exportación.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

use crate::models::user_model::UserRecord;

/// Columnas obligatorias en la cabecera del CSV de importación.
pub const REQUIRED_IMPORT_COLUMNS: [&str; 3] = ["firstName", "lastName", "email"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Una fila de datos del CSV de importación.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// Línea en el archivo: cabecera = 1, primera fila de datos = 2.
    pub line_number: u64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub roles: Option<String>,
    /// La fila completa, columna -> valor, tal como se reporta en `failedItems`.
    pub raw: Value,
}

fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

fn reader(data: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(strip_utf8_bom(data))
}

fn read_headers(reader: &mut csv::Reader<&[u8]>) -> Result<Vec<String>> {
    let headers = reader
        .byte_headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();
    Ok(headers)
}

/// Comprueba que la cabecera traiga las columnas obligatorias.
pub fn validate_import_headers(data: &[u8]) -> Result<(), String> {
    if strip_utf8_bom(data).iter().all(|b| b.is_ascii_whitespace()) {
        return Err("CSV file is empty".to_string());
    }
    let mut reader = reader(data);
    let headers = read_headers(&mut reader).map_err(|e| format!("{e:#}"))?;
    let missing: Vec<&str> = REQUIRED_IMPORT_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == col))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "CSV is missing required columns: {}",
            missing.join(", ")
        ))
    }
}

/// Parsea todas las filas de datos, en orden. Un error de lectura es fatal
/// para el trabajo completo; los campos vacíos se devuelven como `None`.
pub fn parse_import_csv(data: &[u8]) -> Result<Vec<ImportRow>> {
    let mut reader = reader(data);
    let headers = read_headers(&mut reader)?;
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", idx + 2))?;
        let values: Vec<String> = record
            .iter()
            .map(|v| String::from_utf8_lossy(v).to_string())
            .collect();

        let field = |name: &str| -> Option<String> {
            index
                .get(name)
                .and_then(|&i| values.get(i))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut raw = Map::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = values.get(i).cloned().unwrap_or_default();
            raw.insert(header.clone(), Value::String(value));
        }

        rows.push(ImportRow {
            line_number: idx as u64 + 2,
            first_name: field("firstName"),
            last_name: field("lastName"),
            email: field("email"),
            phone: field("phone"),
            password: field("password"),
            roles: field("roles"),
            raw: Value::Object(raw),
        });
    }

    Ok(rows)
}

/// Busca una ruta con puntos (`account.status`) dentro de un documento JSON.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

fn cell_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        // Listas como "a,b" para que el CSV se pueda reimportar (columna roles)
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| cell_value(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other @ Value::Object(_)) => other.to_string(),
    }
}

/// Serializa usuarios a CSV. La cabecera y el orden de columnas son exactamente `fields`.
pub fn write_export_csv(users: &[UserRecord], fields: &[String]) -> Result<Vec<u8>> {
    if fields.is_empty() {
        return Err(anyhow!("Export requires at least one field"));
    }
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(fields)
        .context("Failed to write CSV header")?;

    for user in users {
        let doc = user.safe_profile();
        let row: Vec<String> = fields
            .iter()
            .map(|f| cell_value(lookup_path(&doc, f)))
            .collect();
        writer
            .write_record(&row)
            .with_context(|| format!("Failed to write CSV row for user {}", user.id))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush CSV writer: {}", e))
}
