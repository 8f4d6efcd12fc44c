//! TaskProcessor - 受け取ったバイト列から保存済みの結果までを 1 件ずつ進める
//!
//! # フロー
//! 投入（呼び出し側のタスク、エラーは同期的に返る）:
//! 1. ペイロードを検証し、名前をサニタイズ
//! 2. `TaskRegistry::create()` -> `Pending`
//! 3. バイト列を `{uploads}/{task_id}_{name}` に保存して保存先を記録
//! 4. task id をワーカーグループ向けにキューへ積んで返す
//!
//! 3 か 4 で失敗したら保存済みの入力を削除してタスクを破棄する
//! （失敗した投入は何も残さない）。
//!
//! 投入は手順 2 から 4 の間、キューのゲートを読み取りで保持する。`close()` は
//! 書き込みで取得して送信側を drop する。`close()` が戻った時点で途中の投入はなく、
//! ワーカーは最後に受理したジョブの後でキューの終わりを見る。
//!
//! パイプライン（ワーカーのタスク、エラーはタスクレコードに入る）:
//! 1. `Pending` -> `Processing`
//! 2. 新しい scratch ディレクトリに入力を用意（ローカルディスクのバックエンドなら省略）
//! 3. transformer を実行し、進捗を registry へ中継
//! 4. 結果を `{outputs}/{task_id}_{YYYYmmddHHMMSS}{ext}` に保存
//! 5. scratch ディレクトリを削除してから `Finished` か `Error` にする

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, instrument, warn};

use super::retry::RetryPolicy;
use super::scratch::ScratchSpace;
use super::status::TaskStatusView;
use crate::domain::{SieveError, StorageError, StorageLocation, TaskId, TransformError};
use crate::ports::{Clock, ProgressReporter, StorageBackend, TaskCounts, TaskRegistry, Transformer};

/// 受け付ける元ファイル名（サニタイズ後）の最大バイト数
const MAX_NAME_LEN: usize = 128;

/// Buffered progress values between the transformer and the registry.
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Receiving end of the job queue; handed to `WorkerGroup::spawn`.
pub type JobReceiver = mpsc::Receiver<TaskId>;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub uploads_prefix: String,
    pub outputs_prefix: String,
    /// Parent of every per-task scratch directory.
    pub scratch_dir: PathBuf,
    pub output_retry: RetryPolicy,
    /// Accepted tasks waiting for a worker. `submit` waits when the queue is full.
    pub queue_capacity: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            uploads_prefix: "uploads".to_string(),
            outputs_prefix: "outputs".to_string(),
            scratch_dir: std::env::temp_dir().join("sieve-scratch"),
            output_retry: RetryPolicy::no_retry(),
            queue_capacity: 64,
        }
    }
}

pub struct TaskProcessor {
    registry: Arc<dyn TaskRegistry>,
    storage: Arc<dyn StorageBackend>,
    transformer: Arc<dyn Transformer>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
    /// 閉じた後は `None`
    jobs: RwLock<Option<mpsc::Sender<TaskId>>>,
    accepting: AtomicBool,
}

impl TaskProcessor {
    /// Build a processor and the queue its workers drain.
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        storage: Arc<dyn StorageBackend>,
        transformer: Arc<dyn Transformer>,
        clock: Arc<dyn Clock>,
        settings: ProcessorSettings,
    ) -> (Self, JobReceiver) {
        let (jobs, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let processor = Self {
            registry,
            storage,
            transformer,
            clock,
            settings,
            jobs: RwLock::new(Some(jobs)),
            accepting: AtomicBool::new(true),
        };
        (processor, rx)
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// 投入を受理してスケジュールする。入力を保存したらすぐに戻る
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn submit(&self, data: Bytes, original_name: &str) -> Result<TaskId, SieveError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SieveError::ShuttingDown);
        }
        if data.is_empty() {
            return Err(SieveError::Validation("empty payload".to_string()));
        }
        let name = sanitize_name(original_name).ok_or_else(|| {
            SieveError::Validation(format!("unusable file name {original_name:?}"))
        })?;

        let gate = self.jobs.read().await;
        let Some(jobs) = gate.as_ref() else {
            return Err(SieveError::ShuttingDown);
        };

        let task_id = self.registry.create().await?;
        let key = format!("{}/{}_{}", self.settings.uploads_prefix, task_id, name);
        if let Err(err) = self.accept(jobs, task_id, &key, data).await {
            warn!(task_id = %task_id, error = %err, "submission rejected");
            self.abandon(task_id, &key).await;
            return Err(err);
        }
        info!(task_id = %task_id, key = %key, "task accepted");
        Ok(task_id)
    }

    async fn accept(
        &self,
        jobs: &mpsc::Sender<TaskId>,
        task_id: TaskId,
        key: &str,
        data: Bytes,
    ) -> Result<(), SieveError> {
        self.storage.save(key, data).await?;
        self.registry
            .attach_input(task_id, self.storage.location(key))
            .await?;
        jobs.send(task_id)
            .await
            .map_err(|_| SieveError::ShuttingDown)
    }

    async fn abandon(&self, task_id: TaskId, key: &str) {
        if let Err(err) = self.storage.delete(key).await {
            warn!(task_id = %task_id, key, error = %err, "failed to delete rejected input");
        }
        if let Err(err) = self.registry.discard(task_id).await {
            error!(task_id = %task_id, error = %err, "failed to discard rejected task");
        }
    }

    /// Snapshot of one task for callers.
    pub async fn status(&self, task_id: TaskId) -> Result<TaskStatusView, SieveError> {
        let task = self.registry.get(task_id).await?;
        Ok(TaskStatusView::from(&task))
    }

    pub async fn counts(&self) -> Result<TaskCounts, SieveError> {
        self.registry.counts().await
    }

    /// 新規投入の受付を止める。受理済みのタスクはそのまま実行される
    ///
    /// ゲートを通過済みの投入を待ってから、ジョブキューを閉じる。
    pub async fn close(&self) {
        self.accepting.store(false, Ordering::Release);
        if self.jobs.write().await.take().is_some() {
            info!("processor closed for new submissions");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Run the pipeline for one accepted task. Every outcome ends in the task record.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub async fn run(&self, task_id: TaskId) {
        if let Err(err) = self.registry.transition_to_processing(task_id).await {
            warn!(error = %err, "task cannot start");
            return;
        }
        debug!("processing started");

        let outcome = match ScratchSpace::create(&self.settings.scratch_dir, task_id).await {
            Ok(scratch) => {
                let outcome = self.execute(task_id, &scratch).await;
                scratch.close().await;
                outcome
            }
            Err(err) => Err(SieveError::Processing(TransformError::Io(err))),
        };

        match outcome {
            Ok(output) => match self.registry.mark_finished(task_id, output.clone()).await {
                Ok(()) => info!(output = %output, "task finished"),
                Err(err) => error!(error = %err, "failed to record finished task"),
            },
            Err(err) => {
                error!(error = %err, "task failed");
                self.record_failure(task_id, &err).await;
            }
        }
    }

    /// 通常のパイプライン外の障害（ワーカーの panic）でタスクを `Error` にする
    pub async fn record_fault(&self, task_id: TaskId, fault: &str) {
        error!(task_id = %task_id, fault, "task aborted");
        self.record_failure(task_id, &SieveError::Internal(fault.to_string()))
            .await;
    }

    async fn record_failure(&self, task_id: TaskId, err: &SieveError) {
        if let Err(mark_err) = self.registry.mark_error(task_id, err.classified()).await {
            error!(task_id = %task_id, error = %mark_err, "failed to record task error");
        }
    }

    async fn execute(
        &self,
        task_id: TaskId,
        scratch: &ScratchSpace,
    ) -> Result<StorageLocation, SieveError> {
        let task = self.registry.get(task_id).await?;
        let input = task
            .input_location()
            .ok_or_else(|| SieveError::Internal(format!("{task_id} has no input location")))?;
        let local_input = self.stage_input(input, scratch).await?;

        let produced = self.transform(task_id, &local_input, scratch.path()).await?;
        let data = tokio::fs::read(&produced)
            .await
            .map_err(|e| SieveError::Processing(TransformError::Io(e)))?;
        if data.is_empty() {
            return Err(TransformError::EmptyOutput(produced).into());
        }

        let ext = produced
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let key = format!(
            "{}/{}_{}{}",
            self.settings.outputs_prefix,
            task_id,
            self.clock.now().format("%Y%m%d%H%M%S"),
            ext
        );
        self.save_output(task_id, &key, Bytes::from(data)).await?;
        Ok(self.storage.location(&key))
    }

    /// Local path of the input: the backend's own file, or a copy in scratch.
    async fn stage_input(
        &self,
        input: &StorageLocation,
        scratch: &ScratchSpace,
    ) -> Result<PathBuf, SieveError> {
        let path = self.storage.resolve(input)?;
        if let Some(local) = self.storage.local_path(path) {
            return match tokio::fs::try_exists(&local).await {
                Ok(true) => Ok(local),
                Ok(false) => Err(StorageError::NotFound(path.to_string()).into()),
                Err(err) => Err(StorageError::from_io(err, path).into()),
            };
        }

        let data = self.storage.read(path).await?;
        let staged = scratch.file(&format!("input{}", input.extension().unwrap_or_default()));
        tokio::fs::write(&staged, &data)
            .await
            .map_err(|e| SieveError::Processing(TransformError::Io(e)))?;
        debug!(bytes = data.len(), path = %staged.display(), "input staged");
        Ok(staged)
    }

    async fn transform(
        &self,
        task_id: TaskId,
        input: &Path,
        workdir: &Path,
    ) -> Result<PathBuf, SieveError> {
        let (reporter, mut progress) = ProgressReporter::channel(PROGRESS_CHANNEL_CAPACITY);
        let transform = self.transformer.transform(input, workdir, reporter);
        tokio::pin!(transform);

        let produced = loop {
            tokio::select! {
                biased;
                Some(percent) = progress.recv() => self.relay_progress(task_id, percent).await,
                produced = &mut transform => break produced,
            }
        };
        // values sent just before the transformer returned
        while let Ok(percent) = progress.try_recv() {
            self.relay_progress(task_id, percent).await;
        }
        Ok(produced?)
    }

    async fn relay_progress(&self, task_id: TaskId, percent: u8) {
        match self.registry.update_progress(task_id, percent).await {
            Ok(true) => debug!(task_id = %task_id, percent, "progress"),
            Ok(false) => {}
            Err(err) => debug!(task_id = %task_id, error = %err, "progress update dropped"),
        }
    }

    async fn save_output(&self, task_id: TaskId, key: &str, data: Bytes) -> Result<(), SieveError> {
        let policy = &self.settings.output_retry;
        let mut attempts = 1;
        loop {
            match self.storage.save(key, data.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && policy.should_retry(attempts) => {
                    let delay = policy.next_delay(attempts);
                    warn!(
                        task_id = %task_id,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "output upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Reduce a caller-supplied file name to something safe to embed in a storage key.
///
/// Keeps the last path component; characters outside `[A-Za-z0-9._-]` become `_`.
/// `None` when nothing usable remains.
pub fn sanitize_name(raw: &str) -> Option<String> {
    let last = raw
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return None;
    }
    Some(cleaned)
}
