//! services/bulk_service.rs
//! Motor de operaciones masivas: importación/exportación CSV, actualización,
//! borrado y envío de correos por lotes.
//!
//! `submit` valida, crea el registro en `pending` y entrega el trabajo al
//! executor sin esperar. `run` procesa los ítems de uno en uno, en el orden de
//! entrada, y persiste el progreso después de cada ítem. Un fallo de un ítem
//! queda en `results.failedItems`; solo un fallo del trabajo completo lo deja
//! en `failed`. Los efectos ya aplicados no se revierten.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::config::app_config::AppConfig;
use crate::errors::{BulkError, BulkResult};
use crate::models::audit_model::AuditAction;
use crate::models::bulk_model::{
    BulkDeleteParams, BulkEmailParams, BulkJob, BulkUpdateParams, ExportParams, ImportUpload,
};
use crate::models::operation_model::{
    CreateOperationRequest, FailedItem, InitiatorSummary, ListOperationsResponse, OperationFiles, OperationRecord,
    OperationResults, OperationStatus, OperationType, Progress,
};
use crate::models::user_model::{AccountStatus, NewUser, Role, UserPatch, UserRecord};
use crate::services::audit_service::AuditService;
use crate::services::csv_service::{self, ImportRow};
use crate::services::email_service::{build_bulk_email, NotificationSink};
use crate::services::job_executor::{CancelFlag, JobExecutor, JobHandle};
use crate::services::operation_service::OperationService;
use crate::services::user_service::{hash_password, UserStore, UserStoreError};

const MISSING_FIELDS_ERROR: &str = "Missing required fields (firstName, lastName, email)";
const USER_EXISTS_ERROR: &str = "User already exists";
const USER_NOT_FOUND_ERROR: &str = "User not found";

#[derive(Debug, Clone)]
pub struct BulkSettings {
    pub upload_dir: PathBuf,
    pub default_import_password: String,
    pub email_send_attempts: u32,
    pub email_retry_backoff: Duration,
}

impl From<&AppConfig> for BulkSettings {
    fn from(config: &AppConfig) -> Self {
        BulkSettings {
            upload_dir: config.upload_dir.clone(),
            default_import_password: config.default_import_password.clone(),
            email_send_attempts: config.email_send_attempts,
            email_retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Fallo de un ítem: se registra y el trabajo sigue con el siguiente.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemError {
    pub item: Value,
    pub message: String,
    pub line_number: Option<u64>,
}

impl From<ItemError> for FailedItem {
    fn from(e: ItemError) -> Self {
        FailedItem {
            item: e.item,
            error: e.message,
            line_number: e.line_number,
        }
    }
}

type ItemOutcome = Result<Value, ItemError>;

/// Unidad de trabajo dentro de un trabajo masivo.
enum JobItem {
    Row(ImportRow),
    UserId(String),
}

/// Efecto que se aplica a cada ítem.
enum ItemAction {
    Import,
    Update(UserPatch),
    Delete,
    Email(BulkEmailParams),
}

/// Resultado de un trabajo que llegó al final sin fallo fatal.
struct JobOutcome {
    status: OperationStatus,
    progress: Progress,
    results: OperationResults,
    output_file: Option<String>,
}

/// Archivo exportado listo para descargar.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub download_name: String,
}

#[derive(Clone)]
pub struct BulkService {
    operations: OperationService,
    users: Arc<dyn UserStore>,
    sink: Arc<dyn NotificationSink>,
    audit: AuditService,
    executor: JobExecutor,
    settings: BulkSettings,
}

impl BulkService {
    pub fn new(
        operations: OperationService,
        users: Arc<dyn UserStore>,
        sink: Arc<dyn NotificationSink>,
        audit: AuditService,
        executor: JobExecutor,
        settings: BulkSettings,
    ) -> Self {
        Self {
            operations,
            users,
            sink,
            audit,
            executor,
            settings,
        }
    }

    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    // ======================================================
    // API pública
    // ======================================================

    /// Valida, registra la operación en `pending` y la encola. No espera a ningún ítem.
    pub async fn submit(&self, job: BulkJob, initiator: &str) -> BulkResult<JobHandle> {
        job.validate()?;

        let operation_type = job.operation_type();
        let parameters = job.parameters();
        let files = match &job {
            BulkJob::Import(upload) => {
                csv_service::validate_import_headers(&upload.data)
                    .map_err(BulkError::Validation)?;
                let input = self.store_upload(upload).await?;
                OperationFiles {
                    input: input.to_string_lossy().to_string(),
                    output: String::new(),
                }
            }
            _ => OperationFiles::default(),
        };

        let input_file = files.input.clone();
        let created = self
            .operations
            .create_operation(CreateOperationRequest {
                operation_type,
                initiated_by: initiator.to_string(),
                parameters,
                files,
            })
            .await;
        let record = match created {
            Ok(record) => record,
            Err(e) => {
                // El CSV subido no tiene registro que lo referencie
                if !input_file.is_empty() {
                    if let Err(rm) = tokio::fs::remove_file(&input_file).await {
                        log::warn!("(bulk) could not remove upload {}: {}", input_file, rm);
                    }
                }
                return Err(e.into());
            }
        };

        let op_id = record.operation_id.clone();
        let engine = self.clone();
        let task_op_id = op_id.clone();
        let handle = self.executor.spawn(&op_id, move |cancel| async move {
            engine.run(&task_op_id, cancel).await;
        });

        log::info!(
            "(bulk) {} operation {} queued by {} ({} jobs in executor)",
            operation_type,
            op_id,
            initiator,
            self.executor.running_jobs()
        );
        Ok(handle)
    }

    pub async fn get_status(&self, op_id: &str) -> BulkResult<OperationRecord> {
        let record = self
            .operations
            .get_operation(op_id)
            .await?
            .ok_or_else(|| BulkError::operation_not_found(op_id))?;
        Ok(self.with_initiator(record).await)
    }

    pub async fn list(&self, page: u64, limit: u64) -> BulkResult<ListOperationsResponse> {
        let mut list = self.operations.list_operations(page, limit).await?;
        let mut operations = Vec::with_capacity(list.operations.len());
        for record in list.operations {
            operations.push(self.with_initiator(record).await);
        }
        list.operations = operations;
        Ok(list)
    }

    /// Adjunta nombre y email del iniciador. Si ya no existe, queda solo el id.
    async fn with_initiator(&self, mut record: OperationRecord) -> OperationRecord {
        match self.users.find_by_id(&record.initiated_by).await {
            Ok(Some(user)) => {
                record.initiator = Some(InitiatorSummary {
                    id: user.id,
                    first_name: user.first_name,
                    last_name: user.last_name,
                    email: user.email,
                })
            }
            Ok(None) => {}
            Err(e) => log::warn!(
                "(bulk) could not load initiator {} of {}: {:#}",
                record.initiated_by,
                record.operation_id,
                e
            ),
        }
        record
    }

    /// Solo exportaciones completadas con artefacto en disco.
    pub async fn download(&self, op_id: &str) -> BulkResult<ExportArtifact> {
        let record = self.get_status(op_id).await?;
        if record.operation_type != OperationType::Export {
            return Err(BulkError::InvalidState(format!(
                "Operation {op_id} is a {} operation; only exports can be downloaded",
                record.operation_type
            )));
        }
        if record.status != OperationStatus::Completed {
            return Err(BulkError::InvalidState(format!(
                "Export {op_id} is {}, not completed",
                record.status
            )));
        }
        if record.files.output.is_empty() {
            return Err(BulkError::InvalidState("No export file available".to_string()));
        }
        let path = PathBuf::from(&record.files.output);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BulkError::InvalidState("Export file not found".to_string()));
        }
        Ok(ExportArtifact {
            path,
            download_name: format!("users_export_{}.csv", record.operation_id),
        })
    }

    /// Cancela una operación pendiente o en curso. Lo ya aplicado se conserva.
    pub async fn cancel(&self, op_id: &str) -> BulkResult<OperationRecord> {
        let record = self.get_status(op_id).await?;
        if record.status.is_terminal() {
            return Err(BulkError::InvalidState(format!(
                "Operation {op_id} is already {}",
                record.status
            )));
        }

        if record.status == OperationStatus::Pending && self.operations.cancel_pending(op_id).await?
        {
            self.executor.cancel(op_id);
            log::info!("(bulk) operation {} cancelled before start", op_id);
            return self.get_status(op_id).await;
        }

        if !self.executor.cancel(op_id) {
            // Sin tarea viva (p.ej. quedó huérfana): se cierra con lo que haya
            let mut results = record.results.clone();
            results
                .summary
                .insert("cancelled".to_string(), Value::Bool(true));
            let closed = self
                .operations
                .finish_operation(
                    op_id,
                    OperationStatus::Cancelled,
                    &record.progress,
                    &results,
                    None,
                )
                .await?;
            if !closed {
                return Err(self.already_finished(op_id).await);
            }
        }
        log::info!("(bulk) cancellation requested for operation {}", op_id);

        let current = self.get_status(op_id).await?;
        if matches!(
            current.status,
            OperationStatus::Completed | OperationStatus::Failed
        ) {
            // La tarea terminó antes de ver la señal
            return Err(BulkError::InvalidState(format!(
                "Operation {op_id} is already {}",
                current.status
            )));
        }
        Ok(current)
    }

    async fn already_finished(&self, op_id: &str) -> BulkError {
        match self.operations.get_operation(op_id).await {
            Ok(Some(record)) => BulkError::InvalidState(format!(
                "Operation {op_id} is already {}",
                record.status
            )),
            Ok(None) => BulkError::operation_not_found(op_id),
            Err(e) => e.into(),
        }
    }

    /// Cierra como `failed` lo que un proceso anterior dejó sin terminar.
    pub async fn recover_interrupted(&self) -> BulkResult<u64> {
        let closed = self.operations.fail_interrupted().await?;
        if closed > 0 {
            log::warn!("(bulk) {} interrupted operations marked as failed", closed);
        }
        Ok(closed)
    }

    // ======================================================
    // Ejecución
    // ======================================================

    /// Cuerpo de la tarea. Nunca devuelve error: todo termina en el registro.
    pub async fn run(&self, op_id: &str, cancel: CancelFlag) {
        let record = match self.operations.get_operation(op_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                log::warn!("(bulk) operation {} not found, nothing to run", op_id);
                return;
            }
            Err(e) => {
                log::error!("(bulk) failed to load operation {}: {:?}", op_id, e);
                return;
            }
        };

        match self.operations.mark_processing(op_id).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!(
                    "(bulk) operation {} is no longer pending, skipping run",
                    op_id
                );
                return;
            }
            Err(e) => {
                log::error!("(bulk) failed to start operation {}: {:?}", op_id, e);
                self.fail(&record, &e).await;
                return;
            }
        }

        log::info!(
            "(bulk) processing {} operation {}",
            record.operation_type,
            op_id
        );

        let finished = match self.execute(&record, &cancel).await {
            Ok(outcome) => self.finish(&record, outcome).await,
            Err(e) => Err(e),
        };

        if let Err(e) = finished {
            self.fail(&record, &e).await;
        }
    }

    async fn execute(&self, record: &OperationRecord, cancel: &CancelFlag) -> Result<JobOutcome> {
        match record.operation_type {
            OperationType::Import => {
                let data = tokio::fs::read(&record.files.input)
                    .await
                    .with_context(|| format!("Failed to read import file {}", record.files.input))?;
                let rows = csv_service::parse_import_csv(&data)?;
                let items = rows.into_iter().map(JobItem::Row).collect();
                self.process_items(record, items, ItemAction::Import, cancel)
                    .await
            }
            OperationType::Export => {
                let params: ExportParams = serde_json::from_value(record.parameters.clone())
                    .context("Invalid export parameters")?;
                self.run_export(record, params, cancel).await
            }
            OperationType::BulkUpdate => {
                let params: BulkUpdateParams = serde_json::from_value(record.parameters.clone())
                    .context("Invalid bulk_update parameters")?;
                let items = params.user_ids.into_iter().map(JobItem::UserId).collect();
                self.process_items(record, items, ItemAction::Update(params.updates), cancel)
                    .await
            }
            OperationType::BulkDelete => {
                let params: BulkDeleteParams = serde_json::from_value(record.parameters.clone())
                    .context("Invalid bulk_delete parameters")?;
                let items = params.user_ids.into_iter().map(JobItem::UserId).collect();
                self.process_items(record, items, ItemAction::Delete, cancel)
                    .await
            }
            OperationType::BulkEmail => {
                let params: BulkEmailParams = serde_json::from_value(record.parameters.clone())
                    .context("Invalid bulk_email parameters")?;
                let items = params
                    .recipients
                    .iter()
                    .cloned()
                    .map(JobItem::UserId)
                    .collect();
                self.process_items(record, items, ItemAction::Email(params), cancel)
                    .await
            }
        }
    }

    async fn process_items(
        &self,
        record: &OperationRecord,
        items: Vec<JobItem>,
        action: ItemAction,
        cancel: &CancelFlag,
    ) -> Result<JobOutcome> {
        let op_id = record.operation_id.as_str();
        let mut progress = Progress {
            total: items.len() as u64,
            ..Progress::default()
        };
        self.save_progress(op_id, &progress).await?;

        let mut results = OperationResults::default();
        let mut status = OperationStatus::Completed;

        for item in items {
            if cancel.is_cancelled() {
                log::info!(
                    "(bulk) operation {} cancelled after {} of {} items",
                    op_id,
                    progress.processed,
                    progress.total
                );
                status = OperationStatus::Cancelled;
                break;
            }

            match self.process_item(record, item, &action).await {
                Ok(value) => {
                    results.successful_items.push(value);
                    progress.successful += 1;
                }
                Err(item_error) => {
                    log::debug!(
                        "(bulk) operation {} item failed: {}",
                        op_id,
                        item_error.message
                    );
                    results.failed_items.push(item_error.into());
                    progress.failed += 1;
                }
            }
            progress.processed += 1;
            self.save_progress(op_id, &progress).await?;
        }

        let mut summary = Map::new();
        summary.insert("totalProcessed".to_string(), json!(progress.processed));
        summary.insert("successful".to_string(), json!(progress.successful));
        summary.insert("failed".to_string(), json!(progress.failed));
        if status == OperationStatus::Cancelled {
            summary.insert("cancelled".to_string(), Value::Bool(true));
        }
        results.summary = summary;

        Ok(JobOutcome {
            status,
            progress,
            results,
            output_file: None,
        })
    }

    async fn process_item(
        &self,
        record: &OperationRecord,
        item: JobItem,
        action: &ItemAction,
    ) -> ItemOutcome {
        match (item, action) {
            (JobItem::Row(row), ItemAction::Import) => self.import_row(record, row).await,
            (JobItem::UserId(id), ItemAction::Update(patch)) => {
                self.update_user(record, &id, patch).await
            }
            (JobItem::UserId(id), ItemAction::Delete) => self.delete_user(record, &id).await,
            (JobItem::UserId(id), ItemAction::Email(params)) => self.email_user(&id, params).await,
            (JobItem::Row(row), _) => Err(ItemError {
                item: row.raw,
                message: "Unexpected CSV row for this operation".to_string(),
                line_number: Some(row.line_number),
            }),
            (JobItem::UserId(id), ItemAction::Import) => Err(ItemError {
                item: json!({ "userId": id }),
                message: "Unexpected user id for an import".to_string(),
                line_number: None,
            }),
        }
    }

    async fn import_row(&self, record: &OperationRecord, row: ImportRow) -> ItemOutcome {
        let line_number = Some(row.line_number);
        let fail = |item: &Value, message: String| ItemError {
            item: item.clone(),
            message,
            line_number,
        };

        let (first_name, last_name, email) = match (&row.first_name, &row.last_name, &row.email)
        {
            (Some(f), Some(l), Some(e)) => (f.clone(), l.clone(), e.to_lowercase()),
            _ => return Err(fail(&row.raw, MISSING_FIELDS_ERROR.to_string())),
        };

        if !email.contains('@') {
            return Err(fail(&row.raw, format!("Invalid email address: {email}")));
        }

        match self.users.find_by_email(&email).await {
            Ok(Some(_)) => return Err(fail(&row.raw, USER_EXISTS_ERROR.to_string())),
            Ok(None) => {}
            Err(e) => return Err(fail(&row.raw, format!("{e:#}"))),
        }

        let roles = match parse_roles(row.roles.as_deref()) {
            Ok(roles) => roles,
            Err(message) => return Err(fail(&row.raw, message)),
        };

        let password = row
            .password
            .clone()
            .unwrap_or_else(|| self.settings.default_import_password.clone());
        let password_hash = match hash_password_blocking(password).await {
            Ok(hash) => hash,
            Err(e) => return Err(fail(&row.raw, format!("{e:#}"))),
        };

        let new_user = NewUser {
            first_name,
            last_name,
            email,
            phone: row.phone.clone(),
            password_hash,
            roles,
            account_status: AccountStatus::Active,
            // Los usuarios importados quedan verificados
            email_verified: true,
        };

        let user = match self.users.create(new_user).await {
            Ok(user) => user,
            Err(UserStoreError::DuplicateEmail) => {
                return Err(fail(&row.raw, USER_EXISTS_ERROR.to_string()))
            }
            Err(UserStoreError::Other(e)) => return Err(fail(&row.raw, format!("{e:#}"))),
        };

        self.audit
            .log_activity(
                &user.id,
                &record.initiated_by,
                AuditAction::UserCreated,
                json!({ "source": "bulk_import", "operationId": record.operation_id }),
            )
            .await;

        Ok(user.safe_profile())
    }

    async fn update_user(&self, record: &OperationRecord, id: &str, patch: &UserPatch) -> ItemOutcome {
        let item = json!({ "userId": id });
        let mut user = self.load_user(id, &item).await?;

        patch.apply_to(&mut user);
        let user = self.users.update(&user).await.map_err(|e| ItemError {
            item: item.clone(),
            message: format!("{e:#}"),
            line_number: None,
        })?;

        self.audit
            .log_activity(
                &user.id,
                &record.initiated_by,
                AuditAction::UserUpdated,
                json!({
                    "source": "bulk_update",
                    "operationId": record.operation_id,
                    "updates": patch,
                }),
            )
            .await;

        Ok(user.safe_profile())
    }

    async fn delete_user(&self, record: &OperationRecord, id: &str) -> ItemOutcome {
        let item = json!({ "userId": id });
        let user = self.load_user(id, &item).await?;

        match self.users.delete(id).await {
            Ok(true) => {}
            // Borrado entre la lectura y el delete por otro trabajo
            Ok(false) => {
                return Err(ItemError {
                    item,
                    message: USER_NOT_FOUND_ERROR.to_string(),
                    line_number: None,
                })
            }
            Err(e) => {
                return Err(ItemError {
                    item,
                    message: format!("{e:#}"),
                    line_number: None,
                })
            }
        }

        self.audit
            .log_activity(
                &user.id,
                &record.initiated_by,
                AuditAction::UserDeleted,
                json!({
                    "source": "bulk_delete",
                    "operationId": record.operation_id,
                    "email": user.email,
                }),
            )
            .await;

        Ok(json!({ "userId": user.id, "email": user.email }))
    }

    async fn email_user(&self, id: &str, params: &BulkEmailParams) -> ItemOutcome {
        let item = json!({ "userId": id });
        let user = self.load_user(id, &item).await?;

        let email = build_bulk_email(
            &user,
            &params.subject,
            &params.message,
            params.template.as_deref(),
        );

        let attempts = self.settings.email_send_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.sink.send(&email).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "(bulk) email to {} failed (attempt {}/{}): {:#}",
                        user.email,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.email_retry_backoff * attempt).await;
                    }
                }
            }
        }

        match last_error {
            None => Ok(json!({ "userId": user.id, "email": user.email })),
            Some(e) => Err(ItemError {
                item,
                message: format!("{e:#}"),
                line_number: None,
            }),
        }
    }

    async fn load_user(
        &self,
        id: &str,
        item: &Value,
    ) -> Result<UserRecord, ItemError> {
        match self.users.find_by_id(id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ItemError {
                item: item.clone(),
                message: USER_NOT_FOUND_ERROR.to_string(),
                line_number: None,
            }),
            Err(e) => Err(ItemError {
                item: item.clone(),
                message: format!("{e:#}"),
                line_number: None,
            }),
        }
    }

    async fn run_export(
        &self,
        record: &OperationRecord,
        params: ExportParams,
        cancel: &CancelFlag,
    ) -> Result<JobOutcome> {
        let op_id = record.operation_id.as_str();
        let fields = params.export_fields();

        if cancel.is_cancelled() {
            let mut results = OperationResults::default();
            results
                .summary
                .insert("cancelled".to_string(), Value::Bool(true));
            return Ok(JobOutcome {
                status: OperationStatus::Cancelled,
                progress: Progress::default(),
                results,
                output_file: None,
            });
        }

        let users = self.users.query(&params.filters).await?;
        let exported = users.len() as u64;
        let progress = Progress {
            total: exported,
            processed: exported,
            successful: exported,
            failed: 0,
        };
        self.save_progress(op_id, &progress).await?;

        let csv = csv_service::write_export_csv(&users, &fields)?;

        tokio::fs::create_dir_all(&self.settings.upload_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create upload dir {}",
                    self.settings.upload_dir.display()
                )
            })?;
        let file_name = format!("users_export_{op_id}.csv");
        let path = self.settings.upload_dir.join(&file_name);
        tokio::fs::write(&path, csv)
            .await
            .with_context(|| format!("Failed to write export file {}", path.display()))?;

        let mut results = OperationResults::default();
        results
            .summary
            .insert("totalExported".to_string(), json!(exported));
        results
            .summary
            .insert("fileName".to_string(), json!(file_name));

        Ok(JobOutcome {
            status: OperationStatus::Completed,
            progress,
            results,
            output_file: Some(path.to_string_lossy().to_string()),
        })
    }

    // ======================================================
    // Cierre de la operación
    // ======================================================

    async fn save_progress(&self, op_id: &str, progress: &Progress) -> Result<()> {
        if !self.operations.record_progress(op_id, progress).await? {
            return Err(anyhow!("Operation {op_id} is no longer processing"));
        }
        Ok(())
    }

    async fn finish(&self, record: &OperationRecord, outcome: JobOutcome) -> Result<()> {
        let op_id = record.operation_id.as_str();
        let finished = self
            .operations
            .finish_operation(
                op_id,
                outcome.status,
                &outcome.progress,
                &outcome.results,
                outcome.output_file.as_deref(),
            )
            .await?;
        if !finished {
            return Err(anyhow!("Operation {op_id} reached a terminal state elsewhere"));
        }

        log::info!(
            "(bulk) operation {} {}: {}/{} successful, {} failed",
            op_id,
            outcome.status,
            outcome.progress.successful,
            outcome.progress.total,
            outcome.progress.failed
        );

        self.audit_job(record, outcome.status, Value::Object(outcome.results.summary))
            .await;
        Ok(())
    }

    /// Manejador de último nivel: cualquier fallo fatal deja la operación en `failed`.
    async fn fail(&self, record: &OperationRecord, error: &anyhow::Error) {
        let op_id = record.operation_id.as_str();
        let message = format!("{error:#}");
        log::error!("(bulk) operation {} failed: {}", op_id, message);

        match self.operations.mark_operation_failed(op_id, &message).await {
            Ok(true) => {
                self.audit_job(record, OperationStatus::Failed, json!({ "error": message }))
                    .await
            }
            Ok(false) => log::warn!(
                "(bulk) operation {} was already terminal, failure not recorded",
                op_id
            ),
            Err(e) => log::error!("(bulk) could not mark {} as failed: {:?}", op_id, e),
        }
    }

    async fn audit_job(&self, record: &OperationRecord, status: OperationStatus, summary: Value) {
        self.audit
            .log_activity(
                &record.initiated_by,
                &record.initiated_by,
                AuditAction::BulkOperation,
                json!({
                    "type": record.operation_type,
                    "operationId": record.operation_id,
                    "status": status,
                    "summary": summary,
                }),
            )
            .await;
    }

    /// Guarda el CSV subido en el directorio de uploads: `<millis>-<nombre>`.
    async fn store_upload(&self, upload: &ImportUpload) -> BulkResult<PathBuf> {
        let dir = &self.settings.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create upload dir {}", dir.display()))?;

        let path = dir.join(format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_file_name(&upload.file_name)
        ));
        tokio::fs::write(&path, &upload.data)
            .await
            .with_context(|| format!("Failed to store upload {}", path.display()))?;
        Ok(path)
    }
}

/// Roles separados por coma; sin roles => `mentee`.
fn parse_roles(raw: Option<&str>) -> Result<Vec<Role>, String> {
    let mut roles = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let role: Role = part.parse()?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if roles.is_empty() {
        roles.push(Role::Mentee);
    }
    Ok(roles)
}

async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task failed")?
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}
