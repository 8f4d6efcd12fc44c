//! WorkerGroup - processor のジョブキューを消化する固定数のワーカー
//!
//! # フロー（ワーカーごと）
//! 1. task id を待つ
//! 2. パイプラインを専用の tokio タスクで実行
//! 3. そのタスクが panic したらタスクを `Error` にする
//!
//! ワーカーが終了するのはキューが閉じたときだけ。キューが閉じるのは
//! `TaskProcessor::close()` が送信側を drop し、積まれた id をすべて取り出した後。
//! したがって受理済みのタスクはすべて終端状態になってからグループが止まる。

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::processor::{JobReceiver, TaskProcessor};
use crate::domain::TaskId;

/// ワーカーグループのハンドル
/// - `shutdown_and_join()` で processor を閉じ、キューが空になるまで待つ
pub struct WorkerGroup {
    processor: Arc<TaskProcessor>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// ワーカーを `n` 個（最低 1 個）起動する。tokio ランタイム内で呼ぶこと
    pub fn spawn(n: usize, jobs: JobReceiver, processor: Arc<TaskProcessor>) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));

        let n = n.max(1);
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let jobs = Arc::clone(&jobs);
            let processor = Arc::clone(&processor);

            let join = tokio::spawn(async move {
                worker_loop(worker_id, jobs, processor).await;
            });
            joins.push(join);
        }
        info!(workers = n, "worker group started");

        Self { processor, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// 新規投入を拒否し、受理済みのものをすべて実行して全ワーカーを待つ
    /// 実行中のパイプラインはキャンセルしない
    pub async fn shutdown_and_join(self) {
        self.processor.close().await;
        for j in self.joins {
            if let Err(err) = j.await {
                error!(error = %err, "worker terminated abnormally");
            }
        }
        info!("worker group stopped");
    }
}

async fn worker_loop(worker_id: usize, jobs: Arc<Mutex<JobReceiver>>, processor: Arc<TaskProcessor>) {
    loop {
        // キューを待つのは一度に 1 ワーカー。実行前にロックは解放される
        let next = jobs.lock().await.recv().await;
        let Some(task_id) = next else {
            debug!(worker_id, "job queue closed");
            break;
        };
        execute_isolated(worker_id, &processor, task_id).await;
    }
    debug!(worker_id, "worker stopped");
}

/// パイプラインを専用の tokio タスクで実行する（panic はそのタスク内に閉じる）
async fn execute_isolated(worker_id: usize, processor: &Arc<TaskProcessor>, task_id: TaskId) {
    debug!(worker_id, task_id = %task_id, "job picked up");
    let pipeline = Arc::clone(processor);
    let handle = tokio::spawn(async move { pipeline.run(task_id).await });

    if let Err(err) = handle.await {
        let fault = if err.is_panic() {
            "worker panicked"
        } else {
            "worker cancelled"
        };
        error!(worker_id, task_id = %task_id, error = %err, "pipeline aborted");
        processor.record_fault(task_id, fault).await;
    }
}
