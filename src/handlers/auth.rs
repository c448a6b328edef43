//! handlers/auth.rs
//! Guarda de administrador para las rutas `/api/bulk`.
//!
//! La emisión y validación de tokens queda fuera de este servicio: el gateway
//! de autenticación reenvía el id del usuario autenticado en `X-User-Id`.

use actix_web::HttpRequest;

use crate::errors::{BulkError, BulkResult};
use crate::models::bulk_model::is_object_id;
use crate::models::user_model::UserRecord;
use crate::services::bulk_service::BulkService;

pub const USER_ID_HEADER: &str = "X-User-Id";

pub async fn require_admin(req: &HttpRequest, bulk: &BulkService) -> BulkResult<UserRecord> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BulkError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;

    if !is_object_id(user_id) {
        return Err(BulkError::Unauthorized("invalid user id".to_string()));
    }

    let user = bulk
        .users()
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| BulkError::Unauthorized("user not found".to_string()))?;

    if !user.is_admin() {
        log::warn!("Non-admin user {} tried to access bulk operations", user.id);
        return Err(BulkError::Forbidden(format!(
            "user {} is not an admin",
            user.id
        )));
    }
    Ok(user)
}
