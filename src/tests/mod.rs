//! tests/mod.rs

mod support;

mod handler_tests;
mod operation_tests;
