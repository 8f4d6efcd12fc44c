//! InMemoryTaskRegistry - プロセス内のタスク registry
//!
//! タスクのメタデータはこの map にしかない（プロセス終了で消える）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::{SieveError, StorageLocation, Task, TaskId, TaskStatus, TransitionError};
use crate::ports::{Clock, IdGenerator, TaskCounts, TaskRegistry};

struct RegistryState {
    /// 全タスクのレコード（唯一の正本）
    tasks: HashMap<TaskId, Task>,

    /// 発行後に破棄された id（再利用しない）
    retired: HashSet<TaskId>,
}

/// インメモリ registry
///
/// # 実装
/// - `RwLock<HashMap<TaskId, Task>>`: ステータスの読み取りは共有ロック、遷移は排他ロック
/// - 遷移はすべて 1 つの write guard の中で「検索、遷移の検査、書き込み」を行う
///   （タスクのステータスに対する compare-and-set になる）
/// - guard を保持したまま `.await` しない
pub struct InMemoryTaskRegistry {
    state: RwLock<RegistryState>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskRegistry {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                tasks: HashMap::new(),
                retired: HashSet::new(),
            }),
            ids,
            clock,
        }
    }

    /// write ロックの下でタスクに `f` を適用
    async fn update<T>(
        &self,
        task_id: TaskId,
        op: &'static str,
        f: impl FnOnce(&mut Task) -> Result<T, TransitionError>,
    ) -> Result<T, SieveError> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SieveError::task_not_found(task_id))?;
        f(task).map_err(|err| {
            warn!(task_id = %task_id, op, error = %err, "rejected task transition");
            SieveError::from(err)
        })
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create(&self) -> Result<TaskId, SieveError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        // 使用中や欠番の id は発行しない
        let mut task_id = self.ids.generate_task_id();
        while state.tasks.contains_key(&task_id) || state.retired.contains(&task_id) {
            task_id = self.ids.generate_task_id();
        }
        state.tasks.insert(task_id, Task::new(task_id, now));
        debug!(task_id = %task_id, "task created");
        Ok(task_id)
    }

    async fn get(&self, task_id: TaskId) -> Result<Task, SieveError> {
        let state = self.state.read().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| SieveError::task_not_found(task_id))
    }

    async fn attach_input(
        &self,
        task_id: TaskId,
        location: StorageLocation,
    ) -> Result<(), SieveError> {
        let now = self.clock.now();
        self.update(task_id, "attach_input", |task| task.attach_input(location, now))
            .await
    }

    async fn discard(&self, task_id: TaskId) -> Result<(), SieveError> {
        let mut state = self.state.write().await;
        let status = state
            .tasks
            .get(&task_id)
            .map(Task::status)
            .ok_or_else(|| SieveError::task_not_found(task_id))?;
        if status != TaskStatus::Pending {
            let err = TransitionError::Illegal {
                task_id,
                from: status,
                to: TaskStatus::Pending,
            };
            warn!(task_id = %task_id, error = %err, "refusing to discard accepted task");
            return Err(err.into());
        }
        state.tasks.remove(&task_id);
        state.retired.insert(task_id);
        debug!(task_id = %task_id, "task discarded");
        Ok(())
    }

    async fn transition_to_processing(&self, task_id: TaskId) -> Result<(), SieveError> {
        let now = self.clock.now();
        self.update(task_id, "transition_to_processing", |task| task.start(now))
            .await
    }

    async fn update_progress(&self, task_id: TaskId, percent: u8) -> Result<bool, SieveError> {
        let now = self.clock.now();
        self.update(task_id, "update_progress", |task| task.set_progress(percent, now))
            .await
    }

    async fn mark_finished(
        &self,
        task_id: TaskId,
        output: StorageLocation,
    ) -> Result<(), SieveError> {
        let now = self.clock.now();
        self.update(task_id, "mark_finished", |task| task.finish(output, now))
            .await
    }

    async fn mark_error(&self, task_id: TaskId, detail: String) -> Result<(), SieveError> {
        let now = self.clock.now();
        self.update(task_id, "mark_error", |task| task.fail(detail, now))
            .await
    }

    async fn counts(&self) -> Result<TaskCounts, SieveError> {
        let state = self.state.read().await;
        let mut counts = TaskCounts::default();
        for task in state.tasks.values() {
            match task.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Finished => counts.finished += 1,
                TaskStatus::Error => counts.error += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BackendKind;
    use crate::ports::{SystemClock, UlidGenerator};
    use rstest::rstest;

    fn registry() -> InMemoryTaskRegistry {
        InMemoryTaskRegistry::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    fn loc(path: &str) -> StorageLocation {
        StorageLocation::new(BackendKind::Memory, path)
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let reg = registry();
        let id = reg.create().await.unwrap();
        let task = reg.get(id).await.unwrap();
        assert_eq!(task.id(), id);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(reg.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let reg = registry();
        let other = registry().create().await.unwrap();
        assert!(matches!(reg.get(other).await, Err(SieveError::NotFound(_))));
        assert!(matches!(
            reg.transition_to_processing(other).await,
            Err(SieveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let reg = registry();
        let id = reg.create().await.unwrap();
        reg.attach_input(id, loc("uploads/a")).await.unwrap();
        reg.transition_to_processing(id).await.unwrap();
        assert!(reg.update_progress(id, 50).await.unwrap());
        reg.mark_finished(id, loc("outputs/a")).await.unwrap();

        let task = reg.get(id).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Finished);
        assert_eq!(task.progress(), 100);
        assert_eq!(task.output_location(), Some(&loc("outputs/a")));
        assert_eq!(task.input_location(), Some(&loc("uploads/a")));
    }

    #[derive(Debug, Clone, Copy)]
    enum Terminal {
        Finish,
        Fail,
    }

    #[rstest]
    #[case::finish_then_finish(Terminal::Finish, Terminal::Finish)]
    #[case::finish_then_fail(Terminal::Finish, Terminal::Fail)]
    #[case::fail_then_finish(Terminal::Fail, Terminal::Finish)]
    #[case::fail_then_fail(Terminal::Fail, Terminal::Fail)]
    #[tokio::test]
    async fn second_terminal_is_rejected(#[case] first: Terminal, #[case] second: Terminal) {
        let reg = registry();
        let id = reg.create().await.unwrap();
        reg.transition_to_processing(id).await.unwrap();

        let apply = |t: Terminal, tag: &'static str| {
            let reg = &reg;
            async move {
                match t {
                    Terminal::Finish => reg.mark_finished(id, loc(tag)).await,
                    Terminal::Fail => reg.mark_error(id, tag.to_string()).await,
                }
            }
        };

        apply(first, "first").await.unwrap();
        let before = reg.get(id).await.unwrap();
        assert!(matches!(
            apply(second, "second").await,
            Err(SieveError::Transition(_))
        ));
        let after = reg.get(id).await.unwrap();
        assert_eq!(before, after);

        // restarting a terminal task is rejected too
        assert!(reg.transition_to_processing(id).await.is_err());
        assert_eq!(reg.get(id).await.unwrap(), after);
    }

    #[tokio::test]
    async fn error_before_processing_is_rejected() {
        let reg = registry();
        let id = reg.create().await.unwrap();
        assert!(reg.mark_error(id, "boom".into()).await.is_err());
        assert!(reg.mark_finished(id, loc("outputs/a")).await.is_err());
        assert_eq!(reg.get(id).await.unwrap().status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn discard_retires_pending_only() {
        let reg = registry();
        let id = reg.create().await.unwrap();
        reg.discard(id).await.unwrap();
        assert!(matches!(reg.get(id).await, Err(SieveError::NotFound(_))));

        let accepted = reg.create().await.unwrap();
        reg.transition_to_processing(accepted).await.unwrap();
        assert!(reg.discard(accepted).await.is_err());
        assert!(reg.get(accepted).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_progress_is_monotone() {
        let reg = Arc::new(registry());
        let id = reg.create().await.unwrap();
        reg.transition_to_processing(id).await.unwrap();

        let writer = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move {
                for pct in 0..=100u8 {
                    reg.update_progress(id, pct).await.unwrap();
                    // a stale value arriving late must not win
                    reg.update_progress(id, pct / 2).await.unwrap();
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let seen = reg.get(id).await.unwrap().progress();
            assert!(seen >= last, "progress went from {last} to {seen}");
            last = seen;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(reg.get(id).await.unwrap().progress(), 100);
    }

    #[tokio::test]
    async fn ids_are_unique_across_many_creates() {
        let reg = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(reg.create().await.unwrap());
                }
                ids
            }));
        }
        let mut all = HashSet::new();
        for h in handles {
            for id in h.await.unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(reg.counts().await.unwrap().total(), 800);
    }
}
