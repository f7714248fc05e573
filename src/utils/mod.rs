//! Shared utility functions.
//!
//! This module contains reusable utilities used across the codebase:
//! - `text`: Subject normalisation for cache fingerprinting
//! - `mime`: MIME detection and categorisation for uploads

mod mime;
mod text;

pub use mime::{detect_mime, extension_for_mime, upload_category, UploadCategory};
pub use text::{collapse_whitespace, fold_width, normalise_subject};
