//! Status - 呼び出し側に見せるタスクのビュー

use serde::{Deserialize, Serialize};

use super::retrieval::DownloadDescriptor;
use crate::domain::{Task, TaskStatus};

/// TaskStatusView はステータス問い合わせの結果（1 タスク分）
///
/// `error` は `ERROR` のタスクにだけ付く。分類済みなのでそのまま見せてよい。
/// `download` は `RetrievalRouter::status` 経由で見た `FINISHED` のタスクにだけ付く。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadDescriptor>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            status: task.status(),
            progress: task.progress(),
            error: task.error_detail().map(str::to_string),
            download: None,
        }
    }
}

impl TaskStatusView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn with_download(mut self, download: DownloadDescriptor) -> Self {
        self.download = Some(download);
        self
    }
}
