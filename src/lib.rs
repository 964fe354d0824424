//! Reconciles ERP entity tables with an external system of record.

pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;
