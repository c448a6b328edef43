//! handlers/operation_handler.rs
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::errors::BulkResult;
use crate::handlers::auth::require_admin;
use crate::models::operation_model::{OperationData, OperationResponse};
use crate::services::bulk_service::BulkService;

#[derive(Deserialize)]
pub struct PaginationQuery {
    page: Option<u64>,
    limit: Option<u64>,
}

/// GET /api/bulk/operations
pub async fn list_operations_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    query: web::Query<PaginationQuery>,
) -> BulkResult<HttpResponse> {
    require_admin(&req, &bulk).await?;
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(10);

    let list = bulk.list(page, limit).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": list
    })))
}

/// GET /api/bulk/operations/{operation_id}
pub async fn get_operation_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    path: web::Path<String>,
) -> BulkResult<HttpResponse> {
    require_admin(&req, &bulk).await?;
    let operation = bulk.get_status(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(OperationResponse {
        success: true,
        data: OperationData { operation },
    }))
}

/// POST /api/bulk/operations/{operation_id}/cancel
pub async fn cancel_operation_endpoint(
    req: HttpRequest,
    bulk: web::Data<BulkService>,
    path: web::Path<String>,
) -> BulkResult<HttpResponse> {
    let admin = require_admin(&req, &bulk).await?;
    let op_id = path.into_inner();
    log::info!("Cancel requested for {} by {}", op_id, admin.id);

    let operation = bulk.cancel(&op_id).await?;
    Ok(HttpResponse::Ok().json(OperationResponse {
        success: true,
        data: OperationData { operation },
    }))
}
