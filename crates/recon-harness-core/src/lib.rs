//! # Recon Harness Core
//!
//! Runtime-agnostic logic for Recon Harness: the fragment schema, the
//! format-specific extractors, response normalization for the
//! document-analysis and knowledge-base services, the poll state machine,
//! and the collaborator traits the coordinators are built against.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Waiting is
//! expressed through the [`poll::Clock`] trait so tests can simulate time.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Fragments, file and reconciliation records, storage keys |
//! | [`analysis`] | Document-analysis block graph and its normalization |
//! | [`kb`] | Knowledge-base build status, retrieval filters, references |
//! | [`extract`] | OCR, slide, tabular, and line extractors |
//! | [`ooxml`] | Bounded zip reading, `.pptx` and `.xlsx` parsing |
//! | [`poll`] | Poll state machine with an injectable clock |
//! | [`services`] | Collaborator traits and in-memory doubles |
//! | [`error`] | Error taxonomy |

pub mod analysis;
pub mod error;
pub mod extract;
pub mod kb;
pub mod models;
pub mod ooxml;
pub mod poll;
pub mod services;
