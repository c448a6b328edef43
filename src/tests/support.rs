//! tests/support.rs
//! Helpers compartidos: SQLite en memoria, sink de correo falso y usuarios de prueba.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::config::app_config::AppConfig;
use crate::models::operation_model::{OperationRecord, OperationStatus};
use crate::models::user_model::{AccountStatus, NewUser, Role, UserRecord};
use crate::services::audit_service::AuditService;
use crate::services::bulk_service::{BulkService, BulkSettings};
use crate::services::email_service::{NotificationSink, OutgoingEmail};
use crate::services::job_executor::JobExecutor;
use crate::services::operation_service::OperationService;
use crate::services::user_service::{SqliteUserStore, UserStore};

/// Una sola conexión que nunca se recicla: la base en memoria vive lo que el pool.
pub async fn memory_pool() -> Pool<Sqlite> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

/// Sink que guarda los correos en memoria. Puede fallar para ciertos
/// destinatarios y quedarse esperando en una compuerta.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutgoingEmail>>,
    attempts: Mutex<HashMap<String, u32>>,
    fail_times: HashMap<String, u32>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingSink {
    /// Los primeros `times` envíos a `email` fallan. `u32::MAX` = siempre.
    pub fn failing_for(mut self, email: &str, times: u32) -> Self {
        self.fail_times.insert(email.to_string(), times);
        self
    }

    /// Cada envío espera un permiso de `gate` antes de continuar.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, email: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(email)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|e| anyhow!(e))?;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(email.to.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(&times) = self.fail_times.get(&email.to) {
            if attempt <= times {
                return Err(anyhow!("SMTP rejected {}", email.to));
            }
        }

        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct ContextOptions {
    pub max_concurrent_jobs: usize,
    pub email_send_attempts: u32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_concurrent_jobs: 4,
            email_send_attempts: 1,
        }
    }
}

pub struct TestContext {
    pub bulk: BulkService,
    pub pool: Pool<Sqlite>,
    pub operations: OperationService,
    pub users: Arc<SqliteUserStore>,
    pub audit: AuditService,
    pub sink: Arc<RecordingSink>,
    pub config: AppConfig,
    pub admin: UserRecord,
    _upload_dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(RecordingSink::default(), ContextOptions::default()).await
    }

    pub async fn with_sink(sink: RecordingSink) -> Self {
        Self::with_options(sink, ContextOptions::default()).await
    }

    pub async fn with_options(sink: RecordingSink, options: ContextOptions) -> Self {
        let pool = memory_pool().await;
        let operations = OperationService::new(pool.clone());
        operations.run_migrations().await.expect("migrations");

        let upload_dir = tempfile::tempdir().expect("temp upload dir");
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            upload_dir: upload_dir.path().to_path_buf(),
            max_concurrent_jobs: options.max_concurrent_jobs,
            email_send_attempts: options.email_send_attempts,
            ..AppConfig::default()
        };
        let mut settings = BulkSettings::from(&config);
        settings.email_retry_backoff = Duration::from_millis(1);

        let users = Arc::new(SqliteUserStore::new(pool.clone()));
        let store: Arc<dyn UserStore> = users.clone();
        let sink = Arc::new(sink);
        let notification_sink: Arc<dyn NotificationSink> = sink.clone();
        let audit = AuditService::new(pool.clone());

        let bulk = BulkService::new(
            operations.clone(),
            store,
            notification_sink,
            audit.clone(),
            JobExecutor::new(config.max_concurrent_jobs),
            settings,
        );

        let admin = create_user(
            &users,
            "Ada",
            "Admin",
            "admin@skillconnect.com",
            &[Role::Admin],
        )
        .await;

        TestContext {
            bulk,
            pool,
            operations,
            users,
            audit,
            sink,
            config,
            admin,
            _upload_dir: upload_dir,
        }
    }

    pub async fn seed_user(&self, first: &str, last: &str, email: &str, roles: &[Role]) -> UserRecord {
        create_user(&self.users, first, last, email, roles).await
    }
}

async fn create_user(
    users: &SqliteUserStore,
    first: &str,
    last: &str,
    email: &str,
    roles: &[Role],
) -> UserRecord {
    users
        .create(NewUser {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            phone: None,
            // Sin argon2 aquí: los tests no verifican contraseñas
            password_hash: "not-a-real-hash".to_string(),
            roles: roles.to_vec(),
            account_status: AccountStatus::Active,
            email_verified: true,
        })
        .await
        .expect("seed user")
}

/// Espera hasta que la operación llegue a un estado terminal.
pub async fn wait_for_terminal(bulk: &BulkService, op_id: &str) -> OperationRecord {
    for _ in 0..1000 {
        let record = bulk.get_status(op_id).await.expect("operation exists");
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {op_id} never finished");
}

pub async fn wait_for_status(bulk: &BulkService, op_id: &str, status: OperationStatus) {
    for _ in 0..1000 {
        let record = bulk.get_status(op_id).await.expect("operation exists");
        if record.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("operation {op_id} never reached {status}");
}

/// Invariantes de contadores que toda operación debe cumplir.
pub fn assert_progress_consistent(record: &OperationRecord) {
    let p = record.progress;
    assert_eq!(p.processed, p.successful + p.failed, "{:?}", p);
    assert!(p.processed <= p.total, "{:?}", p);
    if record.status == OperationStatus::Completed {
        assert_eq!(p.processed, p.total, "{:?}", p);
    }
    if record.status.is_terminal() {
        assert!(record.end_time.is_some());
    }
}

pub const MISSING_ID: &str = "ffffffffffffffffffffffff";
