//! ObjectStoreBackend - S3-compatible object store over HTTP.
//!
//! Works against AWS S3, MinIO, and GCS through its S3 interoperability endpoint
//! (HMAC keys). Path-style addressing: `{endpoint}/{bucket}/{key}`.
//!
//! # Lazy client
//! Construction never touches the network or the credentials. The HTTP client
//! and signer are built on first use and then shared read-only, so a process can
//! start with the backend configured before credentials are available.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::sigv4::{Credentials, Signer, encode_key};
use crate::domain::{BackendKind, ErrorKind, StorageError};
use crate::ports::storage::validate_key;
use crate::ports::{Clock, SignedUrl, StorageBackend};

const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Connection settings for the object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    /// e.g. `https://storage.googleapis.com`, `http://127.0.0.1:9000`
    pub endpoint: Url,
    pub bucket: String,
    pub region: String,
    /// Sent as `x-goog-project-id` when set.
    pub project_id: Option<String>,
    /// `None`: read `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` on first use.
    pub credentials: Option<Credentials>,
    pub request_timeout: Duration,
}

struct Client {
    http: reqwest::Client,
    signer: Signer,
}

pub struct ObjectStoreBackend {
    settings: ObjectStoreSettings,
    clock: Arc<dyn Clock>,
    client: OnceCell<Client>,
}

impl ObjectStoreBackend {
    /// Cheap: nothing is validated against the remote side here.
    pub fn new(settings: ObjectStoreSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            client: OnceCell::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    /// Whether the client has been built yet.
    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    async fn client(&self) -> Result<&Client, StorageError> {
        self.client
            .get_or_try_init(|| async {
                let credentials = match &self.settings.credentials {
                    Some(c) => c.clone(),
                    None => credentials_from_env()?,
                };
                let http = reqwest::Client::builder()
                    .timeout(self.settings.request_timeout)
                    .build()
                    .map_err(|e| {
                        StorageError::with_source(
                            ErrorKind::Infrastructure,
                            "failed to build http client",
                            e,
                        )
                    })?;
                info!(
                    endpoint = %self.settings.endpoint,
                    bucket = %self.settings.bucket,
                    "object store client initialized"
                );
                Ok::<Client, StorageError>(Client {
                    http,
                    signer: Signer::new(credentials, self.settings.region.clone()),
                })
            })
            .await
    }

    fn object_url(&self, path: &str) -> Result<Url, StorageError> {
        let key = validate_key(path)?;
        let raw = format!(
            "{}/{}/{}",
            self.settings.endpoint.as_str().trim_end_matches('/'),
            encode_key(&self.settings.bucket),
            encode_key(key)
        );
        Url::parse(&raw).map_err(|e| {
            StorageError::with_source(ErrorKind::Permanent, format!("bad object url for {key}"), e)
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, StorageError> {
        let client = self.client().await?;
        let url = self.object_url(path)?;

        let mut extra = Vec::new();
        if let Some(project) = &self.settings.project_id {
            extra.push(("x-goog-project-id".to_string(), project.clone()));
        }
        let signed = client
            .signer
            .sign_headers(method.as_str(), &url, &extra, &body, self.clock.now());

        let mut request = client.http.request(method.clone(), url);
        for (name, value) in extra.iter().chain(signed.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if method == Method::PUT {
            request = request.body(body);
        }
        request.send().await.map_err(|e| {
            let kind = if e.is_timeout() || e.is_connect() {
                ErrorKind::Transient
            } else {
                ErrorKind::Infrastructure
            };
            StorageError::with_source(kind, format!("{method} {path} failed"), e)
        })
    }
}

fn credentials_from_env() -> Result<Credentials, StorageError> {
    let access = std::env::var(ACCESS_KEY_ENV).ok();
    let secret = std::env::var(SECRET_KEY_ENV).ok();
    match (access, secret) {
        (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => Ok(Credentials::new(a, s)),
        _ => Err(StorageError::backend(
            ErrorKind::Infrastructure,
            format!("object store credentials missing (set {ACCESS_KEY_ENV} and {SECRET_KEY_ENV})"),
        )),
    }
}

fn status_error(status: StatusCode, what: &str) -> StorageError {
    let kind = if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    };
    StorageError::backend(kind, format!("{what}: object store answered {status}"))
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn save(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let len = data.len();
        let response = self.send(Method::PUT, path, data).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &format!("PUT {path}")));
        }
        debug!(path, bytes = len, bucket = %self.settings.bucket, "uploaded object");
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let response = self.send(Method::GET, path, Bytes::new()).await?;
        match response.status() {
            s if s.is_success() => response.bytes().await.map_err(|e| {
                StorageError::with_source(ErrorKind::Transient, format!("GET {path} body"), e)
            }),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            s => Err(status_error(s, &format!("GET {path}"))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let response = self.send(Method::HEAD, path, Bytes::new()).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(s, &format!("HEAD {path}"))),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let response = self.send(Method::DELETE, path, Bytes::new()).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            s => Err(status_error(s, &format!("DELETE {path}"))),
        }
    }

    async fn signed_url(&self, path: &str, expiration: Duration) -> Result<SignedUrl, StorageError> {
        let client = self.client().await?;
        let url = self.object_url(path)?;
        let now = self.clock.now();
        let signed = client.signer.presign(&url, expiration, now).map_err(|e| {
            StorageError::with_source(ErrorKind::Permanent, format!("cannot sign {path}"), e)
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
