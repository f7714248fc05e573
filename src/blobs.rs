//! Content-addressed blob storage for uploaded evidence.
//!
//! Blobs land under a two-level directory keyed by hash prefix:
//! `{blobs_dir}/{hash[0..2]}/{hash}.{extension}`. The blob key handed to
//! clients is `{hash}.{extension}`, so the content hash needed for
//! fingerprinting is always recoverable from the key alone.
//!
//! Vendors fetch evidence through short-lived signed URLs rather than
//! raw filesystem paths.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::utils::{detect_mime, extension_for_mime};

/// Errors from blob storage.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of storing a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Client-facing key, `{sha256}.{ext}`.
    pub key: String,
    /// SHA-256 of the content, hex.
    pub content_hash: String,
    pub size: u64,
    pub mime: String,
}

/// Local content-addressed blob store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    signing_secret: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, signing_secret: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            signing_secret: signing_secret.into(),
        }
    }

    /// Compute SHA-256 hash of content.
    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Extract the content hash from a blob key, if the key is valid.
    pub fn content_hash_of(key: &str) -> Option<&str> {
        let (hash, ext) = key.split_once('.')?;
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return None;
        }
        if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(hash)
    }

    /// Filesystem path for a validated key. Rejects anything that is not
    /// a well-formed `{hash}.{ext}` key, which also rules out traversal.
    pub fn path_for_key(&self, key: &str) -> Result<PathBuf, BlobError> {
        let hash = Self::content_hash_of(key).ok_or_else(|| BlobError::InvalidKey(key.to_string()))?;
        Ok(self.root.join(&hash[..2]).join(key))
    }

    /// Store content, returning its key. Writing the same bytes twice
    /// yields the same key and leaves the existing file in place.
    pub fn put(&self, content: &[u8], declared_mime: Option<&str>) -> Result<StoredBlob, BlobError> {
        let content_hash = Self::compute_hash(content);
        let mime = detect_mime(content, declared_mime);
        let key = format!("{}.{}", content_hash, extension_for_mime(&mime));
        let path = self.root.join(&content_hash[..2]).join(&key);

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }

        Ok(StoredBlob {
            key,
            content_hash,
            size: content.len() as u64,
            mime,
        })
    }

    /// Read a blob back by key.
    pub fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for_key(key)?;
        if !path.exists() {
            return Err(BlobError::NotFound(key.to_string()));
        }
        Ok(std::fs::read(path)?)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for_key(key).map(|p| p.exists()).unwrap_or(false)
    }

    fn signature(&self, key: &str, exp: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(key.as_bytes());
        hasher.update(exp.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Mint a relative fetch URL valid for `ttl_secs`. Vendor-facing
    /// URLs must stay valid for at least 24 hours, so callers pass the
    /// configured TTL rather than something ad hoc.
    pub fn signed_url(&self, key: &str, ttl_secs: i64) -> String {
        let exp = Utc::now().timestamp() + ttl_secs;
        format!("/blobs/{}?exp={}&sig={}", key, exp, self.signature(key, exp))
    }

    /// Check a fetch signature and its expiry.
    pub fn verify(&self, key: &str, exp: i64, sig: &str) -> bool {
        exp > Utc::now().timestamp() && self.signature(key, exp) == sig
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> BlobStore {
        BlobStore::new(dir.to_path_buf(), "test-secret")
    }

    #[test]
    fn test_put_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

        let blob = store.put(&png, None).unwrap();
        assert_eq!(blob.mime, "image/png");
        assert!(blob.key.ends_with(".png"));
        assert_eq!(blob.content_hash.len(), 64);
        assert_eq!(store.read(&blob.key).unwrap(), png);
    }

    #[test]
    fn test_put_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let a = store.put(b"same bytes", None).unwrap();
        let b = store.put(b"same bytes", None).unwrap();
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_key_layout_two_level() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let blob = store.put(b"content", None).unwrap();
        let path = store.path_for_key(&blob.key).unwrap();
        let parent = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(parent, &blob.content_hash[..2]);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        for key in ["../../etc/passwd", "short.png", "nodot", &format!("{}.", "a".repeat(64))] {
            assert!(matches!(store.read(key), Err(BlobError::InvalidKey(_))), "key {key:?}");
        }
        let upper = format!("{}.png", "A".repeat(64));
        assert!(BlobStore::content_hash_of(&upper).is_none());
    }

    #[test]
    fn test_content_hash_of() {
        let hash = "ab".repeat(32);
        let key = format!("{hash}.jpg");
        assert_eq!(BlobStore::content_hash_of(&key), Some(hash.as_str()));
    }

    #[test]
    fn test_signed_url_verifies_and_expires() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = format!("{}.jpg", "cd".repeat(32));

        let url = store.signed_url(&key, 86400);
        let query = url.split_once('?').unwrap().1;
        let mut exp = 0i64;
        let mut sig = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("exp", v) => exp = v.parse().unwrap(),
                ("sig", v) => sig = v.to_string(),
                _ => {}
            }
        }

        assert!(store.verify(&key, exp, &sig));
        // Tampered signature fails.
        assert!(!store.verify(&key, exp, "deadbeef"));
        // Expired timestamp fails even with a matching signature.
        let old_exp = Utc::now().timestamp() - 10;
        let old_sig = store.signature(&key, old_exp);
        assert!(!store.verify(&key, old_exp, &old_sig));
    }
}
