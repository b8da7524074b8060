//! Object-store contract and the filesystem-backed implementation.
//!
//! Production deployments point this at a CDN-fronted bucket; the
//! filesystem implementation is enough for single-node installs and
//! tests. Signed URLs are HMAC-SHA256 over `key:expiry`, so any replica
//! sharing the secret can verify without a store round-trip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{EngineError, EngineResult};

type HmacSha256 = Hmac<Sha256>;

/// Metadata stored alongside an object.
pub type ObjectMetadata = HashMap<String, String>;

/// Result of a successful `put`.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    /// Publicly servable URL for the object.
    pub cdn_url: String,
    pub size_bytes: usize,
}

/// Storage for image bytes: originals on ingestion, outputs on
/// generation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, metadata: ObjectMetadata)
        -> EngineResult<StoredObject>;

    async fn get(&self, key: &str) -> EngineResult<Bytes>;

    /// Keys under a prefix, lexicographic order.
    async fn list(&self, prefix: &str) -> EngineResult<Vec<String>>;

    async fn delete(&self, key: &str) -> EngineResult<()>;

    /// Time-limited signed URL for direct client fetches.
    fn signed_url(&self, key: &str, ttl_secs: u64) -> String;

    /// Verify a signature produced by [`ObjectStore::signed_url`].
    fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool;
}

/// Filesystem-backed store. Keys map to paths under `root`; metadata
/// lives in a `.meta.json` sidecar next to each object.
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
    signing_secret: Vec<u8>,
}

impl FsObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        signing_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    fn path_for(&self, key: &str) -> EngineResult<PathBuf> {
        // Keys are engine-generated, but reject traversal anyway.
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(EngineError::validation(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }

    fn sidecar_for(&self, path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".meta.json");
        path.with_file_name(name)
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .expect("hmac accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: ObjectMetadata,
    ) -> EngineResult<StoredObject> {
        let path = self.path_for(key)?;
        let sidecar = self.sidecar_for(&path);
        let size = bytes.len();
        let meta_json = serde_json::to_vec(&metadata)?;
        tokio::task::spawn_blocking(move || -> EngineResult<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &bytes)?;
            std::fs::write(&sidecar, &meta_json)?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

        Ok(StoredObject {
            key: key.to_string(),
            cdn_url: format!("{}/{key}", self.base_url),
            size_bytes: size,
        })
    }

    async fn get(&self, key: &str) -> EngineResult<Bytes> {
        let path = self.path_for(key)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> EngineResult<Bytes> {
            match std::fs::read(&path) {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(EngineError::not_found(format!("object {key} not found")))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
    }

    async fn list(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> EngineResult<Vec<String>> {
            let mut keys = Vec::new();
            let mut stack = vec![root.clone()];
            while let Some(dir) = stack.pop() {
                let entries = match std::fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                for entry in entries {
                    let entry = entry?;
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                        continue;
                    }
                    let name = path.to_string_lossy();
                    if name.ends_with(".meta.json") {
                        continue;
                    }
                    if let Ok(rel) = path.strip_prefix(&root) {
                        let key = rel.to_string_lossy().replace('\\', "/");
                        if key.starts_with(&prefix) {
                            keys.push(key);
                        }
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        let path = self.path_for(key)?;
        let sidecar = self.sidecar_for(&path);
        tokio::task::spawn_blocking(move || -> EngineResult<()> {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let _ = std::fs::remove_file(&sidecar);
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
    }

    fn signed_url(&self, key: &str, ttl_secs: u64) -> String {
        let expires = Utc::now().timestamp() + ttl_secs as i64;
        let sig = self.sign(key, expires);
        format!("{}/{key}?expires={expires}&sig={sig}", self.base_url)
    }

    fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        // Constant-time comparison via the mac itself.
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .expect("hmac accepts any key length");
        mac.update(key.as_bytes());
        mac.update(b":");
        mac.update(expires.to_string().as_bytes());
        match hex::decode(signature) {
            Ok(raw) => mac.verify_slice(&raw).is_ok(),
            Err(_) => false,
        }
    }
}
