//! StorageBackend port - バイト列の永続化（ローカルディスク、S3 互換オブジェクトストア）
//!
//! # 設計
//! - すべてのバックエンドが同じ操作を持つ（呼び出し側は実装で分岐しない）
//! - 委任アクセスは任意: 持たないバックエンドは `SignedUrl::Unsupported` を返す
//! - パスはバックエンド相対（`uploads/task-..._clip.mp4`）。先頭の `/` は無視する

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::domain::{BackendKind, StorageError, StorageLocation};

/// 委任 URL を要求した結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedUrl {
    /// `expires_at` まで有効、以降は拒否される
    Url { url: String, expires_at: DateTime<Utc> },
    /// このバックエンドは委任アクセスを持たない（エラーではない）
    Unsupported,
}

impl SignedUrl {
    pub fn is_supported(&self) -> bool {
        matches!(self, SignedUrl::Url { .. })
    }
}

/// StorageBackend はバイト列の永続化を統一的に扱う
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// このバックエンドが生成する保存先の種類
    fn kind(&self) -> BackendKind;

    /// `data` を `path` に保存（上書き）
    async fn save(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// `path` の内容全体。なければ `StorageError::NotFound`
    async fn read(&self, path: &str) -> Result<Bytes, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// オブジェクトを削除。存在しなくてもエラーではない
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// 期限付きの取得 URL、または `SignedUrl::Unsupported`
    async fn signed_url(&self, path: &str, expiration: Duration) -> Result<SignedUrl, StorageError>;

    /// バックエンドがローカルディスクの場合、オブジェクトを保持しているローカルファイル
    ///
    /// processor はこれを使って scratch へのコピーを省く
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// このバックエンド上の `path` を指す保存先を作る
    fn location(&self, path: &str) -> StorageLocation {
        StorageLocation::new(self.kind(), normalize_key(path))
    }

    /// `location` がこのバックエンドのものか確認し、パスを返す
    fn resolve<'a>(&self, location: &'a StorageLocation) -> Result<&'a str, StorageError> {
        if location.backend() != self.kind() {
            return Err(StorageError::backend(
                crate::domain::ErrorKind::Permanent,
                format!(
                    "location {location} belongs to the {} backend, active backend is {}",
                    location.backend(),
                    self.kind()
                ),
            ));
        }
        Ok(location.path())
    }
}

/// 先頭のスラッシュを除く（キーも相対パスもスラッシュで始まらない）
pub fn normalize_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// 空のキーや名前空間の外に出ようとするキーを拒否
pub fn validate_key(path: &str) -> Result<&str, StorageError> {
    let key = normalize_key(path);
    if key.is_empty() {
        return Err(StorageError::backend(
            crate::domain::ErrorKind::Permanent,
            "empty storage path",
        ));
    }
    if key.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        return Err(StorageError::backend(
            crate::domain::ErrorKind::Permanent,
            format!("invalid storage path {key:?}"),
        ));
    }
    Ok(key)
}
