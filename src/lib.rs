//! CRM Functions Library
//!
//! Two HTTP-triggered functions over a PostgreSQL CRM schema: `leads` (CRUD
//! over sales contacts) and `broadcasts` (outbound campaigns fanned out to a
//! segment of leads). Each invocation takes a normalized request envelope,
//! opens one database session, and returns a response envelope.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `db`: Session gateway traits and the PostgreSQL gateway.
//! - `db_storage`: SQL statements behind the store trait.
//! - `envelope`: Request/response envelopes and invocation context.
//! - `errors`: Error handling types.
//! - `handlers`: axum adapter exposing the functions over HTTP.
//! - `leads_handler`: Leads function.
//! - `broadcasts_handler`: Broadcasts function.
//! - `models`: Rows and request payloads.

pub mod broadcasts_handler;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod envelope;
pub mod errors;
pub mod handlers;
pub mod leads_handler;
pub mod models;
