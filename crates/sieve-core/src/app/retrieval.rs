//! RetrievalRouter - 完了したタスクから出力の取得方法を決める
//!
//! # 設計
//! - 委任アクセスを持つバックエンドは新しい署名付き URL へのリダイレクト
//!   （リクエストごとに発行し、キャッシュしない）
//! - それ以外はストリーム記述子。呼び出し側は同じバックエンドを通る
//!   `open_stream` でバイト列を読む
//! - ダウンロードできるのは `Finished` のタスクだけ
//! - `status` は完了タスクのビューに同じ記述子を付ける
//!   （ポーリングする側は追加の呼び出しなしで取得先がわかる）

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::status::TaskStatusView;
use crate::domain::{SieveError, StorageLocation, Task, TaskId, TaskStatus};
use crate::ports::{SignedUrl, StorageBackend, TaskRegistry};

pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

/// DownloadDescriptor はタスクの出力の取得方法
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadDescriptor {
    /// クライアントを `url` へ送る（`expires_at` で無効になる）
    Redirect {
        url: String,
        expires_at: DateTime<Utc>,
    },
    /// `location` のバイト列を直接返す
    Stream {
        location: StorageLocation,
        file_name: String,
    },
}

impl DownloadDescriptor {
    pub fn is_redirect(&self) -> bool {
        matches!(self, DownloadDescriptor::Redirect { .. })
    }
}

pub struct RetrievalRouter {
    registry: Arc<dyn TaskRegistry>,
    storage: Arc<dyn StorageBackend>,
    ttl: Duration,
}

impl RetrievalRouter {
    pub fn new(registry: Arc<dyn TaskRegistry>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            registry,
            storage,
            ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }

    /// Lifetime of signed URLs handed out by `resolve_download`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn resolve_download(&self, task_id: TaskId) -> Result<DownloadDescriptor, SieveError> {
        let task = self.registry.get(task_id).await?;
        self.describe(&task).await
    }

    /// タスクのステータスビュー。完了タスクにはダウンロード記述子も付く
    ///
    /// 記述子を作れなかった場合（署名の失敗など）はログに出して省く。
    /// ステータス自体は返す。
    pub async fn status(&self, task_id: TaskId) -> Result<TaskStatusView, SieveError> {
        let task = self.registry.get(task_id).await?;
        let view = TaskStatusView::from(&task);
        if task.status() != TaskStatus::Finished {
            return Ok(view);
        }
        match self.describe(&task).await {
            Ok(download) => Ok(view.with_download(download)),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "no download descriptor for finished task");
                Ok(view)
            }
        }
    }

    async fn describe(&self, task: &Task) -> Result<DownloadDescriptor, SieveError> {
        let task_id = task.id();
        if task.status() != TaskStatus::Finished {
            return Err(SieveError::NotReady {
                task_id,
                status: task.status(),
            });
        }
        let location = task.output_location().ok_or_else(|| {
            SieveError::Internal(format!("finished task {task_id} has no output location"))
        })?;
        let path = self.storage.resolve(location)?;

        match self.storage.signed_url(path, self.ttl).await? {
            SignedUrl::Url { url, expires_at } => {
                debug!(%expires_at, "redirecting to signed url");
                Ok(DownloadDescriptor::Redirect { url, expires_at })
            }
            SignedUrl::Unsupported => {
                debug!(location = %location, "streaming directly");
                let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
                Ok(DownloadDescriptor::Stream {
                    location: location.clone(),
                    file_name,
                })
            }
        }
    }

    /// ストリーム記述子の保存先からバイト列を読む
    pub async fn open_stream(&self, location: &StorageLocation) -> Result<Bytes, SieveError> {
        let path = self.storage.resolve(location)?;
        Ok(self.storage.read(path).await?)
    }
}
