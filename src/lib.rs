//! Molaris: multi-tenant dental clinic management backend.
//!
//! Shared data (tenants, users, certificates, audit trail) lives in the
//! `public` schema; each clinic's own data lives in its `tenant_<id>`
//! schema, reached by pinning the connection's `search_path`.

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod integrations;
pub mod models;
pub mod signing;
pub mod state;
