//! InMemoryBackend - テストと開発用のプロセス内ストレージ
//!
//! - `std::sync::RwLock` で守った `HashMap<String, Bytes>`（`.await` をまたいで保持しない）
//! - 委任 URL は任意（オブジェクトストアと同じ SigV4 署名器で署名）
//! - 障害注入: あるプレフィックス配下の save / read をバックエンドエラーで失敗させる

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::sigv4::{Signer, encode_key};
use crate::domain::{BackendKind, ErrorKind, StorageError};
use crate::ports::storage::validate_key;
use crate::ports::{Clock, SignedUrl, StorageBackend};

struct UrlSigning {
    base: Url,
    signer: Signer,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Faults {
    save_prefixes: Vec<String>,
    read_prefixes: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    objects: RwLock<HashMap<String, Bytes>>,
    faults: RwLock<Faults>,
    signing: Option<UrlSigning>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base`（例: `http://memory.invalid/bucket`）を起点に署名付き URL を発行する
    pub fn with_signed_urls(mut self, base: Url, signer: Signer, clock: Arc<dyn Clock>) -> Self {
        self.signing = Some(UrlSigning {
            base,
            signer,
            clock,
        });
        self
    }

    /// Every `save` of a path starting with `prefix` fails with a transient backend error.
    pub fn fail_saves_under(&self, prefix: impl Into<String>) {
        let mut faults = self.faults.write().unwrap_or_else(|e| e.into_inner());
        faults.save_prefixes.push(prefix.into());
    }

    /// Every `read` of a path starting with `prefix` fails with a transient backend error.
    pub fn fail_reads_under(&self, prefix: impl Into<String>) {
        let mut faults = self.faults.write().unwrap_or_else(|e| e.into_inner());
        faults.read_prefixes.push(prefix.into());
    }

    /// 注入した障害をすべて外す
    pub fn clear_faults(&self) {
        let mut faults = self.faults.write().unwrap_or_else(|e| e.into_inner());
        *faults = Faults::default();
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn injected(&self, key: &str, reads: bool) -> Result<(), StorageError> {
        let faults = self.faults.read().unwrap_or_else(|e| e.into_inner());
        let prefixes = if reads {
            &faults.read_prefixes
        } else {
            &faults.save_prefixes
        };
        if prefixes.iter().any(|p| key.starts_with(p.as_str())) {
            return Err(StorageError::backend(
                ErrorKind::Transient,
                format!("injected fault for {key}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn save(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let key = validate_key(path)?;
        self.injected(key, false)?;
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let key = validate_key(path)?;
        self.injected(key, true)?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let key = validate_key(path)?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects.contains_key(key))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let key = validate_key(path)?;
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.remove(key);
        Ok(())
    }

    async fn signed_url(&self, path: &str, expiration: Duration) -> Result<SignedUrl, StorageError> {
        let Some(signing) = &self.signing else {
            return Ok(SignedUrl::Unsupported);
        };
        let key = validate_key(path)?;
        let raw = format!(
            "{}/{}",
            signing.base.as_str().trim_end_matches('/'),
            encode_key(key)
        );
        let url = Url::parse(&raw).map_err(|e| {
            StorageError::with_source(ErrorKind::Permanent, format!("bad url for {key}"), e)
        })?;
        let now = signing.clock.now();
        let signed = signing.signer.presign(&url, expiration, now).map_err(|e| {
            StorageError::with_source(ErrorKind::Permanent, format!("cannot sign {key}"), e)
        })?;
        let expires_at = now
            + chrono::Duration::from_std(expiration).map_err(|e| {
                StorageError::with_source(ErrorKind::Permanent, "expiration out of range", e)
            })?;
        Ok(SignedUrl::Url {
            url: signed.into(),
            expires_at,
        })
    }
}
