//! services/mod.rs
//! Módulo que agrupa distintos "servicios" o "capas de negocio" de la app.

pub mod audit_service;
pub mod bulk_service;
pub mod csv_service;
pub mod email_service;
pub mod job_executor;
pub mod operation_service;
pub mod user_service;
