//! config/app_config.rs
//! Configuración global del servicio, leída de variables de entorno (.env).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Contraseña asignada a usuarios importados sin columna `password`.
pub const DEFAULT_IMPORT_PASSWORD: &str = "DefaultPassword123!";

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_concurrent_jobs: usize,
    pub email_send_attempts: u32,
    pub default_import_password: String,
    pub from_email: String,
    /// `None` => se usa el sink de log en lugar de SMTP.
    pub smtp: Option<SmtpConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite:data/skillconnect.db".to_string(),
            host: "0.0.0.0".to_string(),
            port: 5022,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_concurrent_jobs: 4,
            email_send_attempts: 1,
            default_import_password: DEFAULT_IMPORT_PASSWORD.to_string(),
            from_email: "noreply@skillconnect.com".to_string(),
            smtp: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: parse_var("SMTP_PORT", 587u16)?,
                user: env::var("SMTP_USER").unwrap_or_default(),
                pass: env::var("SMTP_PASS").unwrap_or_default(),
            }),
            _ => None,
        };

        let config = AppConfig {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            max_concurrent_jobs: parse_var(
                "BULK_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?
            .max(1),
            email_send_attempts: parse_var("EMAIL_SEND_ATTEMPTS", defaults.email_send_attempts)?
                .max(1),
            default_import_password: env::var("DEFAULT_IMPORT_PASSWORD")
                .unwrap_or(defaults.default_import_password),
            from_email: env::var("FROM_EMAIL").unwrap_or(defaults.from_email),
            smtp,
        };

        Ok(config)
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
