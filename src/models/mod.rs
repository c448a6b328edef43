//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod audit_model;
pub mod bulk_model;
pub mod operation_model;
pub mod user_model;
