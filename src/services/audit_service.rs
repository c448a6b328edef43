//! services/audit_service.rs
//! Registro de auditoría append-only. Un fallo al escribir nunca interrumpe la
//! operación que lo origina: se registra en el log y se descarta.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::models::audit_model::{AuditAction, AuditEvent};
use crate::services::user_service::{format_timestamp, parse_timestamp};

#[derive(Clone, Debug)]
pub struct AuditService {
    db_pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    user_id: String,
    performed_by: String,
    action: String,
    details: String,
    timestamp: String,
}

impl AuditService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        AuditService { db_pool }
    }

    pub async fn log_activity(
        &self,
        user_id: &str,
        performed_by: &str,
        action: AuditAction,
        details: Value,
    ) {
        if let Err(e) = self.insert_event(user_id, performed_by, action, &details).await {
            log::error!(
                "Audit logging failed (action={}, user={}): {:?}",
                action.as_str(),
                user_id,
                e
            );
        }
    }

    async fn insert_event(
        &self,
        user_id: &str,
        performed_by: &str,
        action: AuditAction,
        details: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, user_id, performed_by, action, details, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(performed_by)
        .bind(action.as_str())
        .bind(serde_json::to_string(details)?)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert audit event")?;
        Ok(())
    }

    /// Historial de un usuario, más reciente primero.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, user_id, performed_by, action, details, timestamp
            FROM audit_logs
            WHERE user_id = ?1
            ORDER BY timestamp DESC, rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to load audit events")?;

        rows.into_iter()
            .map(|r| {
                Ok(AuditEvent {
                    details: serde_json::from_str(&r.details)?,
                    timestamp: parse_timestamp(&r.timestamp)?,
                    id: r.id,
                    user_id: r.user_id,
                    performed_by: r.performed_by,
                    action: r.action,
                })
            })
            .collect()
    }
}
