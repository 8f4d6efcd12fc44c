//! TaskRegistry port - タスクのメタデータの正本
//!
//! # 設計
//! - 遷移ごとに 1 つのアトミックな操作: 検査と書き込みは同じロックの下で行うので、
//!   ステータスの読み取りが遷移の途中を見ることはない
//! - 不正な遷移は `SieveError::Transition` で拒否してログに出す。
//!   保存済みのレコードは一切変更しない
//! - 読み取りは所有権付きのスナップショットを返す（`Task` は `Clone`）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{SieveError, StorageLocation, Task, TaskId};

/// ステータスごとのタスク数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub finished: usize,
    pub error: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.finished + self.error
    }
}

#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// `Pending` のタスクを新規作成して id を返す
    async fn create(&self) -> Result<TaskId, SieveError>;

    /// タスクのスナップショット。未知の id は `SieveError::NotFound`
    async fn get(&self, task_id: TaskId) -> Result<Task, SieveError>;

    /// 投入された成果物の保存先を記録（`Pending` の間に 1 回だけ）
    async fn attach_input(&self, task_id: TaskId, location: StorageLocation)
    -> Result<(), SieveError>;

    /// 受理されなかった `Pending` タスクを破棄
    ///
    /// id は欠番になる（再発行されず、`get` は未知の id として扱う）
    async fn discard(&self, task_id: TaskId) -> Result<(), SieveError>;

    /// Pending -> Processing.
    async fn transition_to_processing(&self, task_id: TaskId) -> Result<(), SieveError>;

    /// Processing -> Processing。進捗が前に進んだかを返す
    async fn update_progress(&self, task_id: TaskId, percent: u8) -> Result<bool, SieveError>;

    /// Processing -> Finished.
    async fn mark_finished(&self, task_id: TaskId, output: StorageLocation)
    -> Result<(), SieveError>;

    /// Processing -> Error.
    async fn mark_error(&self, task_id: TaskId, detail: String) -> Result<(), SieveError>;

    async fn counts(&self) -> Result<TaskCounts, SieveError>;
}
