//! handlers/mod.rs
//! Módulo que agrupa los distintos handlers HTTP.

pub mod auth;
pub mod bulk_handler;
pub mod operation_handler;
