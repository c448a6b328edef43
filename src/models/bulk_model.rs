//! models/bulk_model.rs
//! Parámetros de cada tipo de trabajo masivo y su validación.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BulkError, BulkResult};
use crate::models::operation_model::OperationType;
use crate::models::user_model::{AccountStatus, Role, UserFilter, UserPatch};

/// Campos exportados cuando la petición no indica ninguno.
pub const DEFAULT_EXPORT_FIELDS: [&str; 8] = [
    "firstName",
    "lastName",
    "email",
    "phone",
    "roles",
    "account.status",
    "verification.email.isVerified",
    "createdAt",
];

/// Rutas que se pueden proyectar desde `UserRecord::safe_profile`.
pub const EXPORTABLE_FIELDS: [&str; 12] = [
    "id",
    "firstName",
    "lastName",
    "email",
    "phone",
    "roles",
    "currentRole",
    "account.status",
    "account.suspensionReason",
    "verification.email.isVerified",
    "createdAt",
    "updatedAt",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportParams {
    #[serde(default)]
    pub filters: UserFilter,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ExportParams {
    /// Columnas efectivas, en el orden pedido.
    pub fn export_fields(&self) -> Vec<String> {
        if self.fields.is_empty() {
            DEFAULT_EXPORT_FIELDS.iter().map(|f| f.to_string()).collect()
        } else {
            self.fields.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkUpdateParams {
    pub user_ids: Vec<String>,
    pub updates: UserPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkDeleteParams {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BulkEmailParams {
    pub recipients: Vec<String>,
    pub subject: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Archivo CSV recibido en `/import`.
#[derive(Debug, Clone)]
pub struct ImportUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Un trabajo validado, listo para registrarse.
#[derive(Debug, Clone)]
pub enum BulkJob {
    Import(ImportUpload),
    Export(ExportParams),
    BulkUpdate(BulkUpdateParams),
    BulkDelete(BulkDeleteParams),
    BulkEmail(BulkEmailParams),
}

impl BulkJob {
    /// Construye el trabajo a partir del JSON de la petición.
    /// Import no llega por aquí: su entrada es un archivo.
    pub fn from_json(operation_type: OperationType, body: Value) -> BulkResult<Self> {
        match operation_type {
            OperationType::Import => Err(BulkError::validation(
                "Import jobs require an uploaded CSV file",
            )),
            OperationType::Export => {
                // Un body vacío o null equivale a exportar todo con campos por defecto
                let body = if body.is_null() {
                    Value::Object(Default::default())
                } else {
                    body
                };
                Ok(BulkJob::Export(parse_params(body)?))
            }
            OperationType::BulkUpdate => {
                let mut params: BulkUpdateParams = parse_params(body)?;
                lowercase_ids(&mut params.user_ids);
                Ok(BulkJob::BulkUpdate(params))
            }
            OperationType::BulkDelete => {
                let mut params: BulkDeleteParams = parse_params(body)?;
                lowercase_ids(&mut params.user_ids);
                Ok(BulkJob::BulkDelete(params))
            }
            OperationType::BulkEmail => {
                let mut params: BulkEmailParams = parse_params(body)?;
                lowercase_ids(&mut params.recipients);
                Ok(BulkJob::BulkEmail(params))
            }
        }
    }

    pub fn operation_type(&self) -> OperationType {
        match self {
            BulkJob::Import(_) => OperationType::Import,
            BulkJob::Export(_) => OperationType::Export,
            BulkJob::BulkUpdate(_) => OperationType::BulkUpdate,
            BulkJob::BulkDelete(_) => OperationType::BulkDelete,
            BulkJob::BulkEmail(_) => OperationType::BulkEmail,
        }
    }

    /// Validación estructural previa a crear el registro.
    pub fn validate(&self) -> BulkResult<()> {
        match self {
            BulkJob::Import(upload) => validate_upload(upload),
            BulkJob::Export(params) => validate_export_fields(&params.fields),
            BulkJob::BulkUpdate(params) => {
                validate_object_ids("userIds", &params.user_ids)?;
                if params.updates.is_empty() {
                    return Err(BulkError::validation(
                        "\"updates\" must contain at least one of roles, status, suspensionReason",
                    ));
                }
                if let Some(roles) = &params.updates.roles {
                    if roles.iter().any(|r| !matches!(r, Role::Mentee | Role::Mentor)) {
                        return Err(BulkError::validation(
                            "\"updates.roles\" items must be one of [mentee, mentor]",
                        ));
                    }
                }
                if params.updates.status == Some(AccountStatus::Pending) {
                    return Err(BulkError::validation(
                        "\"updates.status\" must be one of [active, inactive, suspended]",
                    ));
                }
                Ok(())
            }
            BulkJob::BulkDelete(params) => validate_object_ids("userIds", &params.user_ids),
            BulkJob::BulkEmail(params) => {
                validate_object_ids("recipients", &params.recipients)?;
                if params.subject.trim().is_empty() {
                    return Err(BulkError::validation("\"subject\" is not allowed to be empty"));
                }
                if params.message.trim().is_empty() {
                    return Err(BulkError::validation("\"message\" is not allowed to be empty"));
                }
                Ok(())
            }
        }
    }

    /// Parámetros tal como se persisten en el registro.
    pub fn parameters(&self) -> Value {
        let value = match self {
            BulkJob::Import(upload) => Ok(serde_json::json!({
                "fileName": upload.file_name,
                "size": upload.data.len(),
            })),
            BulkJob::Export(params) => serde_json::to_value(ExportParams {
                filters: params.filters.clone(),
                fields: params.export_fields(),
            }),
            BulkJob::BulkUpdate(params) => serde_json::to_value(params),
            BulkJob::BulkDelete(params) => serde_json::to_value(params),
            BulkJob::BulkEmail(params) => serde_json::to_value(params),
        };
        value.unwrap_or(Value::Null)
    }
}

fn lowercase_ids(ids: &mut [String]) {
    for id in ids.iter_mut() {
        id.make_ascii_lowercase();
    }
}

fn parse_params<T: DeserializeOwned>(body: Value) -> BulkResult<T> {
    serde_json::from_value(body).map_err(|e| BulkError::validation(e.to_string()))
}

/// Identificador de documento: 24 caracteres hexadecimales.
pub fn is_object_id(id: &str) -> bool {
    id.len() == 24 && id.chars().all(|c| c.is_ascii_hexdigit())
}

fn validate_object_ids(field: &str, ids: &[String]) -> BulkResult<()> {
    if ids.is_empty() {
        return Err(BulkError::validation(format!(
            "\"{field}\" must contain at least 1 item"
        )));
    }
    if let Some((idx, bad)) = ids.iter().enumerate().find(|(_, id)| !is_object_id(id)) {
        return Err(BulkError::validation(format!(
            "\"{field}[{idx}]\" must be a 24 character hex string, got \"{bad}\""
        )));
    }
    Ok(())
}

fn validate_export_fields(fields: &[String]) -> BulkResult<()> {
    for field in fields {
        if !EXPORTABLE_FIELDS.contains(&field.as_str()) {
            return Err(BulkError::validation(format!(
                "Unknown export field \"{field}\""
            )));
        }
    }
    Ok(())
}

fn validate_upload(upload: &ImportUpload) -> BulkResult<()> {
    if upload.data.is_empty() {
        return Err(BulkError::validation("No file uploaded"));
    }
    let is_csv_type = upload
        .content_type
        .as_deref()
        .map(|ct| ct.starts_with("text/csv") || ct.starts_with("application/vnd.ms-excel"))
        .unwrap_or(false);
    let is_csv_name = upload.file_name.to_lowercase().ends_with(".csv");
    if !is_csv_type && !is_csv_name {
        return Err(BulkError::validation("Only CSV files are allowed"));
    }
    Ok(())
}
