//! # Recon Harness
//!
//! Document ingestion and reconciliation over a managed knowledge base.
//!
//! Source documents (PDF and images via OCR, slide decks, spreadsheets,
//! plain text) are stored, decomposed into metadata-tagged fragments and
//! indexed into a knowledge base. Reconciliation queries retrieve fragments,
//! generate an answer and record the full provenance chain for replay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Extractors (core)│──▶│ Object store │
//! │ CLI/HTTP │   │ OCR/Slide/Table  │   │ + SQLite idx │
//! └──────────┘   └──────────────────┘   └──────┬───────┘
//!                                              │ rebuild
//!                                              ▼
//!                ┌──────────────────┐   ┌──────────────┐
//!                │ Recon records    │◀──│ Knowledge    │
//!                │ (replay, prune)  │   │ base (RAG)   │
//!                └──────────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recon init
//! recon ingest payments ./q3-ledger.xlsx
//! recon query payments "Which invoices have no matching payment?"
//! recon recons payments
//! recon serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`ingest`] | Ingestion coordinator |
//! | [`recon`] | Query, replay and snippet lookup |
//! | [`retention`] | Age-based pruning |
//! | [`object_store`] | S3 and local object stores |
//! | [`textract`] | Document-analysis client |
//! | [`bedrock`] | Knowledge-base client |
//! | [`aws`] | SigV4 signing and transport |
//! | [`sqlite_store`] | Metadata store |
//! | [`server`] | HTTP front-end |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Fragment schema, extractors and collaborator traits live in the
//! `recon-harness-core` crate.

pub mod aws;
pub mod backends;
pub mod bedrock;
pub mod clock;
pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod object_store;
pub mod recon;
pub mod retention;
pub mod server;
pub mod sqlite_store;
pub mod textract;
