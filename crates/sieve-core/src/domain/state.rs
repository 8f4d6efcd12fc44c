//! TaskStatus - タスクの状態遷移

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskStatus はタスクの状態
///
/// # 状態遷移
/// - Pending -> Processing
/// - Processing -> Processing（進捗更新のみ）
/// - Processing -> Finished
/// - Processing -> Error
///
/// Finished と Error は終端状態（そこから出る遷移はない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// 受理済み、ワーカー待ち
    Pending,

    /// ワーカーが処理中
    Processing,

    /// 出力を保存済み
    Finished,

    /// 失敗（レコードに分類済みのエラー詳細が入る）
    Error,
}

impl TaskStatus {
    /// 終端状態か（これ以上遷移しない）
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Error)
    }

    /// `self -> next` が許可された遷移か
    ///
    /// `Processing -> Processing` は許可（進捗更新）
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Finished)
                | (TaskStatus::Processing, TaskStatus::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
