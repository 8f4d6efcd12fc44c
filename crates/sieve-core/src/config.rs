//! Config - `SIEVE_*` 環境変数による実行時設定
//!
//! | variable | default |
//! |---|---|
//! | `SIEVE_STORAGE_BACKEND` | `local` (`local`, `object_store`, `memory`) |
//! | `SIEVE_LOCAL_ROOT` | `./storage` |
//! | `SIEVE_SCRATCH_DIR` | `$TMPDIR/sieve-scratch` |
//! | `SIEVE_UPLOADS_PREFIX` / `SIEVE_OUTPUTS_PREFIX` | `uploads` / `outputs` |
//! | `SIEVE_BUCKET` | required for `object_store` |
//! | `SIEVE_PROJECT_ID` | unset |
//! | `SIEVE_ENDPOINT` | `https://storage.googleapis.com` |
//! | `SIEVE_REGION` | `auto` |
//! | `SIEVE_ACCESS_KEY_ID` / `SIEVE_SECRET_ACCESS_KEY` | 未設定（`AWS_*` にフォールバック） |
//! | `SIEVE_SIGNED_URL_TTL_SECS` | `3600` |
//! | `SIEVE_WORKERS` | `2` |
//! | `SIEVE_QUEUE_CAPACITY` | `64` |
//! | `SIEVE_OUTPUT_UPLOAD_ATTEMPTS` | `1` |
//! | `SIEVE_REQUEST_TIMEOUT_SECS` | `60` |
//! | `SIEVE_TRANSFORM_COMMAND` | unset |

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::app::{ProcessorSettings, RetryPolicy};
use crate::domain::{BackendKind, SieveError};
use crate::impls::sigv4::MAX_PRESIGN_EXPIRY;
use crate::impls::{Credentials, ObjectStoreSettings};

pub const ENV_PREFIX: &str = "SIEVE_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_backend")]
    pub storage_backend: String,
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default = "default_uploads_prefix")]
    pub uploads_prefix: String,
    #[serde(default = "default_outputs_prefix")]
    pub outputs_prefix: String,

    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_output_upload_attempts")]
    pub output_upload_attempts: u32,

    /// e.g. `sorawm-cli --input {input} --output {output}`
    #[serde(default)]
    pub transform_command: Option<String>,
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_local_root() -> PathBuf {
    PathBuf::from("storage")
}
fn default_uploads_prefix() -> String {
    "uploads".to_string()
}
fn default_outputs_prefix() -> String {
    "outputs".to_string()
}
fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}
fn default_region() -> String {
    "auto".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_signed_url_ttl_secs() -> u64 {
    3600
}
fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}
fn default_output_upload_attempts() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: default_backend(),
            local_root: default_local_root(),
            scratch_dir: None,
            uploads_prefix: default_uploads_prefix(),
            outputs_prefix: default_outputs_prefix(),
            bucket: None,
            project_id: None,
            endpoint: default_endpoint(),
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            output_upload_attempts: default_output_upload_attempts(),
            transform_command: None,
        }
    }
}

impl Config {
    /// プロセスの環境変数から `SIEVE_*` を読む
    pub fn from_env() -> Result<Self, SieveError> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Config>()
            .map_err(|e| SieveError::Config(e.to_string()))
    }

    /// Same as `from_env`, from explicit `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, SieveError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Config>(vars)
            .map_err(|e| SieveError::Config(e.to_string()))
    }

    pub fn backend_kind(&self) -> Result<BackendKind, SieveError> {
        self.storage_backend
            .parse()
            .map_err(|e| SieveError::Config(format!("storage_backend: {e}")))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sieve-scratch"))
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    /// 動かない設定を早期にエラーにする
    pub fn validate(&self) -> Result<(), SieveError> {
        let backend = self.backend_kind()?;
        if self.workers == 0 {
            return Err(SieveError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(SieveError::Config("queue_capacity must be at least 1".into()));
        }
        if self.output_upload_attempts == 0 {
            return Err(SieveError::Config(
                "output_upload_attempts must be at least 1".into(),
            ));
        }
        for (name, prefix) in [
            ("uploads_prefix", &self.uploads_prefix),
            ("outputs_prefix", &self.outputs_prefix),
        ] {
            let trimmed = prefix.trim_matches('/');
            if trimmed.is_empty() || trimmed.split('/').any(|s| s.is_empty() || s == "..") {
                return Err(SieveError::Config(format!("{name} {prefix:?} is not a usable prefix")));
            }
        }
        if self.uploads_prefix.trim_matches('/') == self.outputs_prefix.trim_matches('/') {
            return Err(SieveError::Config(
                "uploads_prefix and outputs_prefix must differ".into(),
            ));
        }
        let max_ttl = MAX_PRESIGN_EXPIRY.as_secs();
        if self.signed_url_ttl_secs == 0 || self.signed_url_ttl_secs > max_ttl {
            return Err(SieveError::Config(format!(
                "signed_url_ttl_secs must be within 1..={max_ttl}"
            )));
        }
        if backend == BackendKind::ObjectStore {
            self.object_store_settings()?;
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(SieveError::Config(
                "access_key_id and secret_access_key must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            uploads_prefix: self.uploads_prefix.trim_matches('/').to_string(),
            outputs_prefix: self.outputs_prefix.trim_matches('/').to_string(),
            scratch_dir: self.scratch_dir(),
            output_retry: RetryPolicy::with_attempts(self.output_upload_attempts),
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn object_store_settings(&self) -> Result<ObjectStoreSettings, SieveError> {
        let bucket = self
            .bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| SieveError::Config("bucket is required for the object store".into()))?;
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| SieveError::Config(format!("endpoint {:?}: {e}", self.endpoint)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SieveError::Config(format!(
                "endpoint {:?} must be http or https",
                self.endpoint
            )));
        }
        let credentials = match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials::new(id.clone(), secret.clone())),
            _ => None,
        };
        Ok(ObjectStoreSettings {
            endpoint,
            bucket: bucket.to_string(),
            region: self.region.clone(),
            project_id: self.project_id.clone().filter(|p| !p.is_empty()),
            credentials,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}
