//! RenoGuard - risk analysis pipeline for home renovation.
//!
//! Backend for a renovation marketplace app: company vetting, quote and
//! contract audits, acceptance photo checks, and an AI designer Q&A.
//! Every analysis funnels through one fingerprint-keyed cache and a
//! bounded worker pool, so identical questions are answered once and
//! vendor spend stays predictable.

pub mod analysis;
pub mod assembler;
pub mod blobs;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod store;
pub mod utils;
pub mod vendors;
