//! services/operation_service.rs
//! Operation Record Store: un registro por trabajo masivo, con progreso y resultados.
//!
//! Todas las escrituras posteriores a la creación llevan una guarda de estado en
//! el `WHERE`, de modo que un registro terminal no vuelve a mutar.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Map, Value};
use sqlx::{Pool, Sqlite};

use crate::models::operation_model::{
    CreateOperationRequest, ListOperationsResponse, OperationFiles, OperationRecord,
    OperationResults, OperationStatus, Pagination, Progress,
};
use crate::services::user_service::{format_timestamp, parse_timestamp};

const OPERATION_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Clone, Debug)]
pub struct OperationService {
    db_pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    operation_id: String,
    operation_type: String,
    initiated_by: String,
    status: String,
    progress_total: i64,
    progress_processed: i64,
    progress_successful: i64,
    progress_failed: i64,
    parameters: String,
    results: String,
    input_file: String,
    output_file: String,
    start_time: Option<String>,
    end_time: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<OperationRow> for OperationRecord {
    type Error = anyhow::Error;

    fn try_from(row: OperationRow) -> Result<Self> {
        Ok(OperationRecord {
            operation_type: row.operation_type.parse().map_err(|e: String| anyhow!(e))?,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            progress: Progress {
                total: row.progress_total as u64,
                processed: row.progress_processed as u64,
                successful: row.progress_successful as u64,
                failed: row.progress_failed as u64,
            },
            parameters: serde_json::from_str(&row.parameters)
                .context("Invalid parameters column")?,
            results: serde_json::from_str(&row.results).context("Invalid results column")?,
            files: OperationFiles {
                input: row.input_file,
                output: row.output_file,
            },
            start_time: row.start_time.as_deref().map(parse_timestamp).transpose()?,
            end_time: row.end_time.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            operation_id: row.operation_id,
            initiated_by: row.initiated_by,
            initiator: None,
        })
    }
}

const OPERATION_COLUMNS: &str = "operation_id, operation_type, initiated_by, status, \
     progress_total, progress_processed, progress_successful, progress_failed, \
     parameters, results, input_file, output_file, start_time, end_time, created_at, updated_at";

impl OperationService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        OperationService { db_pool }
    }

    /// Corre migraciones con sqlx (users, bulk_operations, audit_logs)
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// Crea la operación en DB con estado "pending"
    pub async fn create_operation(&self, req: CreateOperationRequest) -> Result<OperationRecord> {
        let now = Utc::now();
        let record = OperationRecord {
            operation_id: generate_operation_id(&now),
            operation_type: req.operation_type,
            initiated_by: req.initiated_by,
            initiator: None,
            status: OperationStatus::Pending,
            progress: Progress::default(),
            parameters: req.parameters,
            results: OperationResults::default(),
            files: req.files,
            start_time: None,
            end_time: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO bulk_operations (
                operation_id, operation_type, initiated_by, status,
                parameters, results, input_file, output_file, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&record.operation_id)
        .bind(record.operation_type.as_str())
        .bind(&record.initiated_by)
        .bind(serde_json::to_string(&record.parameters)?)
        .bind(serde_json::to_string(&record.results)?)
        .bind(&record.files.input)
        .bind(&record.files.output)
        .bind(format_timestamp(&now))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert bulk operation")?;

        Ok(record)
    }

    /// Obtiene la info de una operación
    pub async fn get_operation(&self, op_id: &str) -> Result<Option<OperationRecord>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM bulk_operations WHERE operation_id = ?1");
        let row = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(op_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load bulk operation")?;
        row.map(OperationRecord::try_from).transpose()
    }

    /// Lista operaciones con paginación, las más recientes primero
    pub async fn list_operations(&self, page: u64, limit: u64) -> Result<ListOperationsResponse> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = (page - 1) * limit;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bulk_operations")
            .fetch_one(&self.db_pool)
            .await
            .context("Failed to count bulk operations")?;
        let total = total as u64;

        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM bulk_operations \
             ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        );
        let rows = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list bulk operations")?;

        let operations = rows
            .into_iter()
            .map(OperationRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(ListOperationsResponse {
            operations,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(limit),
            },
        })
    }

    /// pending -> processing. Devuelve `false` si la operación ya no estaba pendiente.
    pub async fn mark_processing(&self, op_id: &str) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = 'processing',
                start_time = ?2,
                updated_at = ?2
            WHERE operation_id = ?1 AND status = 'pending'
            "#,
        )
        .bind(op_id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to mark operation as processing")?;

        Ok(result.rows_affected() == 1)
    }

    /// Persiste los contadores. Solo válido mientras la operación está en `processing`.
    pub async fn record_progress(&self, op_id: &str, progress: &Progress) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET progress_total = ?2,
                progress_processed = ?3,
                progress_successful = ?4,
                progress_failed = ?5,
                updated_at = ?6
            WHERE operation_id = ?1 AND status = 'processing'
            "#,
        )
        .bind(op_id)
        .bind(progress.total as i64)
        .bind(progress.processed as i64)
        .bind(progress.successful as i64)
        .bind(progress.failed as i64)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to update operation progress")?;

        Ok(result.rows_affected() == 1)
    }

    /// Cierra la operación con un estado terminal y sus resultados finales.
    pub async fn finish_operation(
        &self,
        op_id: &str,
        status: OperationStatus,
        progress: &Progress,
        results: &OperationResults,
        output_file: Option<&str>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(anyhow!("Cannot finish operation with status {status}"));
        }
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = ?2,
                progress_total = ?3,
                progress_processed = ?4,
                progress_successful = ?5,
                progress_failed = ?6,
                results = ?7,
                output_file = COALESCE(?8, output_file),
                end_time = ?9,
                updated_at = ?9
            WHERE operation_id = ?1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(op_id)
        .bind(status.as_str())
        .bind(progress.total as i64)
        .bind(progress.processed as i64)
        .bind(progress.successful as i64)
        .bind(progress.failed as i64)
        .bind(serde_json::to_string(results)?)
        .bind(output_file)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to finish operation")?;

        Ok(result.rows_affected() == 1)
    }

    /// Marca la operación como `failed` con el mensaje en `results.summary.error`.
    /// Los contadores de progreso quedan como estaban.
    pub async fn mark_operation_failed(&self, op_id: &str, error: &str) -> Result<bool> {
        let mut summary = Map::new();
        summary.insert("error".to_string(), json!(error));
        let results = OperationResults {
            summary,
            ..Default::default()
        };

        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = 'failed',
                results = ?2,
                end_time = ?3,
                updated_at = ?3
            WHERE operation_id = ?1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(op_id)
        .bind(serde_json::to_string(&results)?)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to mark operation as failed")?;

        Ok(result.rows_affected() == 1)
    }

    /// Al arrancar, cualquier operación que quedó a medias en un proceso anterior
    /// ya no tiene tarea que la termine: se cierra como `failed`.
    pub async fn fail_interrupted(&self) -> Result<u64> {
        let mut summary = Map::new();
        summary.insert(
            "error".to_string(),
            json!("Interrupted by server restart"),
        );
        let results = OperationResults {
            summary,
            ..Default::default()
        };
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = 'failed',
                results = ?1,
                end_time = ?2,
                updated_at = ?2
            WHERE status IN ('pending', 'processing')
            "#,
        )
        .bind(serde_json::to_string(&results)?)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to close interrupted operations")?;

        Ok(result.rows_affected())
    }

    /// pending -> cancelled, sin pasar por processing.
    pub async fn cancel_pending(&self, op_id: &str) -> Result<bool> {
        let mut summary = Map::new();
        summary.insert("cancelled".to_string(), Value::Bool(true));
        let results = OperationResults {
            summary,
            ..Default::default()
        };
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = 'cancelled',
                results = ?2,
                end_time = ?3,
                updated_at = ?3
            WHERE operation_id = ?1 AND status = 'pending'
            "#,
        )
        .bind(op_id)
        .bind(serde_json::to_string(&results)?)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to cancel operation")?;

        Ok(result.rows_affected() == 1)
    }
}

/// `op_<millis>_<9 caracteres base36>`
pub fn generate_operation_id(now: &DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| OPERATION_ID_CHARSET[rng.gen_range(0..OPERATION_ID_CHARSET.len())] as char)
        .collect();
    format!("op_{}_{}", now.timestamp_millis(), suffix)
}
