//! handlers/bulk_handler.rs
//! Endpoints para encolar trabajos masivos y descargar exportaciones.

use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::Context;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::config::app_config::AppConfig;
use crate::errors::{BulkError, BulkResult};
use crate::handlers::auth::require_admin;
use crate::models::bulk_model::{BulkJob, ImportUpload};
use crate::models::operation_model::{OperationIdData, OperationType, SubmitOperationResponse};
use crate::services::bulk_service::BulkService;

fn queued(operation_id: &str, message: &str) -> HttpResponse {
    HttpResponse::Ok().json(SubmitOperationResponse {
        success: true,
        message: message.to_string(),
        data: OperationIdData {
            operation_id: operation_id.to_string(),
        },
    })
}

/// JSON roto => 400 con el sobre de error habitual. Vacío o solo espacios => `{}`.
fn parse_body(body: &[u8]) -> BulkResult<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|e| BulkError::validation(format!("Invalid JSON body: {e}")))
}

async fn submit_json(
    req: &HttpRequest,
    bulk: &BulkService,
    operation_type: OperationType,
    body: &[u8],
    message: &str,
) -> BulkResult<HttpResponse> {
    let admin = require_admin(req, bulk).await?;
    let job = BulkJob::from_json(operation_type, parse_body(body)?)?;
    let handle = bulk.submit(job, &admin.id).await?;
    Ok(queued(handle.operation_id(), message))
}

/// POST /api/bulk/import (multipart, campo `file`)
pub async fn import_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    config: web::Data<AppConfig>,
    mut payload: Multipart,
) -> BulkResult<HttpResponse> {
    let admin = require_admin(&req, &bulk).await?;

    let mut upload: Option<ImportUpload> = None;
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| BulkError::validation(format!("Invalid multipart data: {e}")))?;

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or("upload.csv")
            .to_string();
        let content_type = field.content_type().map(|m| m.essence_str().to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let bytes =
                chunk.map_err(|e| BulkError::validation(format!("Error reading file: {e}")))?;
            if data.len() + bytes.len() > config.max_upload_bytes {
                return Err(BulkError::validation(format!(
                    "File too large: limit is {} bytes",
                    config.max_upload_bytes
                )));
            }
            data.extend_from_slice(&bytes);
        }

        upload = Some(ImportUpload {
            file_name,
            content_type,
            data,
        });
    }

    let upload = upload.ok_or_else(|| BulkError::validation("No file uploaded"))?;
    log::info!(
        "Import upload '{}' ({} bytes) from {}",
        upload.file_name,
        upload.data.len(),
        admin.id
    );

    let handle = bulk.submit(BulkJob::Import(upload), &admin.id).await?;
    Ok(queued(
        handle.operation_id(),
        "File upload successful. Import process started.",
    ))
}

/// POST /api/bulk/export
pub async fn export_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    body: web::Bytes,
) -> BulkResult<HttpResponse> {
    submit_json(
        &req,
        &bulk,
        OperationType::Export,
        &body,
        "Export process started.",
    )
    .await
}

/// PUT /api/bulk/update
pub async fn update_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    body: web::Bytes,
) -> BulkResult<HttpResponse> {
    submit_json(
        &req,
        &bulk,
        OperationType::BulkUpdate,
        &body,
        "Bulk update process started.",
    )
    .await
}

/// POST /api/bulk/delete
pub async fn delete_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    body: web::Bytes,
) -> BulkResult<HttpResponse> {
    submit_json(
        &req,
        &bulk,
        OperationType::BulkDelete,
        &body,
        "Bulk delete process started.",
    )
    .await
}

/// POST /api/bulk/email
pub async fn email_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    body: web::Bytes,
) -> BulkResult<HttpResponse> {
    submit_json(
        &req,
        &bulk,
        OperationType::BulkEmail,
        &body,
        "Bulk email process started.",
    )
    .await
}

/// GET /api/bulk/download/{operation_id}
pub async fn download_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    path: web::Path<String>,
) -> BulkResult<NamedFile> {
    require_admin(&req, &bulk).await?;
    let artifact = bulk.download(&path.into_inner()).await?;

    let file = NamedFile::open_async(&artifact.path)
        .await
        .with_context(|| format!("Failed to open export file {}", artifact.path.display()))?;

    Ok(file.set_content_disposition(ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(artifact.download_name)],
    }))
}

/// GET /api/bulk/audit/{user_id}
pub async fn audit_history_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    path: web::Path<String>,
) -> BulkResult<HttpResponse> {
    require_admin(&req, &bulk).await?;
    let events = bulk.audit().list_for_user(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "activities": events }
    })))
}
