use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Import,
    Export,
    BulkUpdate,
    BulkDelete,
    BulkEmail,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Import => "import",
            OperationType::Export => "export",
            OperationType::BulkUpdate => "bulk_update",
            OperationType::BulkDelete => "bulk_delete",
            OperationType::BulkEmail => "bulk_email",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "import" => Ok(OperationType::Import),
            "export" => Ok(OperationType::Export),
            "bulk_update" => Ok(OperationType::BulkUpdate),
            "bulk_delete" => Ok(OperationType::BulkDelete),
            "bulk_email" => Ok(OperationType::BulkEmail),
            other => Err(format!("Unknown operation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "cancelled" => Ok(OperationStatus::Cancelled),
            other => Err(format!("Unknown operation status: {other}")),
        }
    }
}

/// Contadores de progreso. `processed == successful + failed` siempre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub item: Value,
    pub error: String,
    /// Solo para importaciones: línea del CSV (cabecera = 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResults {
    #[serde(default)]
    pub successful_items: Vec<Value>,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
    #[serde(default)]
    pub summary: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationFiles {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub operation_id: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub initiated_by: String,
    /// Solo en respuestas de consulta; no se persiste.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<InitiatorSummary>,
    pub status: OperationStatus,
    pub progress: Progress,
    pub parameters: Value,
    pub results: OperationResults,
    pub files: OperationFiles,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatorSummary {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Datos para registrar una operación nueva en estado `pending`.
#[derive(Debug, Clone)]
pub struct CreateOperationRequest {
    pub operation_type: OperationType,
    pub initiated_by: String,
    pub parameters: Value,
    pub files: OperationFiles,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationIdData {
    pub operation_id: String,
}

/// Respuesta al encolar un trabajo.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOperationResponse {
    pub success: bool,
    pub message: String,
    pub data: OperationIdData,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub data: OperationData,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationData {
    pub operation: OperationRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

/// Para listar operaciones con paginación
#[derive(Debug, Clone, Serialize)]
pub struct ListOperationsResponse {
    pub operations: Vec<OperationRecord>,
    pub pagination: Pagination,
}
