use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::audit_service::AuditService;
use crate::services::bulk_service::{BulkService, BulkSettings};
use crate::services::email_service::{
    LogNotificationSink, NotificationSink, SmtpNotificationSink,
};
use crate::services::job_executor::JobExecutor;
use crate::services::operation_service::OperationService;
use crate::services::user_service::{SqliteUserStore, UserStore};

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    // Crear la carpeta del archivo SQLite si hace falta (p.ej. ./data)
    let file = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if !file.starts_with(":memory:") {
        if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    log::info!("Conectando a SQLite en {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid DATABASE_URL {database_url}"))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to connect to SQLite")
}

fn build_sink(config: &AppConfig) -> Result<Arc<dyn NotificationSink>> {
    match &config.smtp {
        Some(smtp) => {
            log::info!("Enviando correos por SMTP via {}:{}", smtp.host, smtp.port);
            Ok(Arc::new(SmtpNotificationSink::new(smtp, &config.from_email)?))
        }
        None => {
            log::warn!("SMTP_HOST no configurado; los correos solo se registran en el log");
            Ok(Arc::new(LogNotificationSink))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env()?;
    let db_pool = setup_database(&config.database_url).await?;

    let operation_service = OperationService::new(db_pool.clone());
    operation_service.run_migrations().await?;

    let users: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(db_pool.clone()));
    let bulk_service = BulkService::new(
        operation_service,
        users,
        build_sink(&config)?,
        AuditService::new(db_pool.clone()),
        JobExecutor::new(config.max_concurrent_jobs),
        BulkSettings::from(&config),
    );

    // Ningún trabajo sobrevive a un reinicio
    bulk_service.recover_interrupted().await?;

    let bind = (config.host.clone(), config.port);
    log::info!("Levantando servidor en {}:{}", bind.0, bind.1);

    let bulk_data = web::Data::new(bulk_service);
    let config_data = web::Data::new(config);
    HttpServer::new(move || {
        App::new()
            .app_data(bulk_data.clone())
            .app_data(config_data.clone())
            .configure(app::init_app)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
