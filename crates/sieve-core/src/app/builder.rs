//! AppBuilder - アプリケーションの構築と配線
//!
//! # 責務
//! - 何かを起動する前に設定を検証する（fail fast）
//! - ストレージバックエンドを設定から 1 回だけ選ぶ（注入されていればそれを使う）
//! - registry / processor / router / worker group をつなぐ

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use super::processor::TaskProcessor;
use super::retrieval::{DownloadDescriptor, RetrievalRouter};
use super::status::TaskStatusView;
use super::worker_loop::WorkerGroup;
use crate::config::Config;
use crate::domain::{BackendKind, SieveError, TaskId};
use crate::impls::{
    CommandTransformer, FilesystemBackend, InMemoryBackend, InMemoryTaskRegistry,
    ObjectStoreBackend,
};
use crate::ports::{Clock, StorageBackend, SystemClock, TaskRegistry, Transformer, UlidGenerator};

/// AppBuilder は `Config` から `App` を組み立てる
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(Config::from_env()?)
///     .transformer(Arc::new(my_transformer))
///     .build()
///     .await?;
/// let id = app.processor.submit(bytes, "clip.mp4").await?;
/// ```
///
/// # Fail-fast 設計
/// - 最初に `Config::validate()` を実行
/// - transformer がない（注入なし、`transform_command` もなし）場合はエラー
/// - ファイルシステムバックエンドはここでルートを作るので、使えないルートは `build()` で失敗する
pub struct AppBuilder {
    config: Config,
    storage: Option<Arc<dyn StorageBackend>>,
    transformer: Option<Arc<dyn Transformer>>,
    clock: Option<Arc<dyn Clock>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            transformer: None,
            clock: None,
        }
    }

    /// `storage_backend` の指定ではなく、このバックエンドを使う
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// `transform_command` ではなく、この transformer を使う
    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 検証、配線、ワーカー起動。tokio ランタイム内で呼ぶこと
    pub async fn build(self) -> Result<App, SieveError> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let transformer = match self.transformer {
            Some(t) => t,
            None => {
                let line = config.transform_command.as_deref().ok_or_else(|| {
                    SieveError::Config(
                        "no transformer configured (set SIEVE_TRANSFORM_COMMAND)".into(),
                    )
                })?;
                let command = CommandTransformer::from_command_line(line).ok_or_else(|| {
                    SieveError::Config("transform_command is empty".into())
                })?;
                Arc::new(command) as Arc<dyn Transformer>
            }
        };

        let storage = match self.storage {
            Some(s) => s,
            None => select_backend(&config, clock.clone()).await?,
        };

        let registry: Arc<dyn TaskRegistry> = Arc::new(InMemoryTaskRegistry::new(
            Arc::new(UlidGenerator::new(clock.clone())),
            clock.clone(),
        ));
        let (processor, jobs) = TaskProcessor::new(
            registry.clone(),
            storage.clone(),
            transformer,
            clock,
            config.processor_settings(),
        );
        let processor = Arc::new(processor);
        let router = RetrievalRouter::new(registry.clone(), storage.clone())
            .with_ttl(config.signed_url_ttl());
        let workers = WorkerGroup::spawn(config.workers, jobs, processor.clone());

        info!(
            backend = %storage.kind(),
            workers = config.workers,
            "app ready"
        );
        Ok(App {
            processor,
            router,
            registry,
            storage,
            workers,
        })
    }
}

/// `storage_backend` が指すバックエンドを作る
async fn select_backend(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn StorageBackend>, SieveError> {
    let backend: Arc<dyn StorageBackend> = match config.backend_kind()? {
        BackendKind::Local => Arc::new(FilesystemBackend::new(&config.local_root).await?),
        BackendKind::ObjectStore => Arc::new(ObjectStoreBackend::new(
            config.object_store_settings()?,
            clock,
        )),
        BackendKind::Memory => Arc::new(InMemoryBackend::new()),
    };
    Ok(backend)
}

/// 起動済みのアプリケーション
///
/// 呼び出し側が使うのは `submit`, `status`, `resolve_download` の 3 つ。
/// 件数の取得やストリーミングが必要な場合に備えて構成要素も公開している。
pub struct App {
    pub processor: Arc<TaskProcessor>,
    pub router: RetrievalRouter,
    pub registry: Arc<dyn TaskRegistry>,
    pub storage: Arc<dyn StorageBackend>,
    workers: WorkerGroup,
}

impl App {
    pub async fn submit(&self, data: Bytes, original_name: &str) -> Result<TaskId, SieveError> {
        self.processor.submit(data, original_name).await
    }

    /// タスクのステータス。完了タスクにはダウンロード情報が付く
    pub async fn status(&self, task_id: TaskId) -> Result<TaskStatusView, SieveError> {
        self.router.status(task_id).await
    }

    pub async fn resolve_download(
        &self,
        task_id: TaskId,
    ) -> Result<DownloadDescriptor, SieveError> {
        self.router.resolve_download(task_id).await
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 新規投入を拒否し、受理済みのタスクをすべて終えてからワーカーを止める
    pub async fn shutdown(self) {
        self.workers.shutdown_and_join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransformError;
    use crate::ports::ProgressReporter;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct Identity;

    #[async_trait]
    impl Transformer for Identity {
        async fn transform(
            &self,
            input: &Path,
            workdir: &Path,
            _progress: ProgressReporter,
        ) -> Result<PathBuf, TransformError> {
            let out = workdir.join("out.bin");
            tokio::fs::copy(input, &out).await?;
            Ok(out)
        }
    }

    fn config(dir: &Path) -> Config {
        Config {
            local_root: dir.join("store"),
            scratch_dir: Some(dir.join("scratch")),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn build_success_with_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppBuilder::new(config(dir.path()))
            .transformer(Arc::new(Identity))
            .build()
            .await
            .unwrap();

        assert_eq!(app.storage.kind(), BackendKind::Local);
        assert_eq!(app.worker_count(), 2);
        assert_eq!(app.router.ttl().as_secs(), 3600);
        assert!(dir.path().join("store").is_dir());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn build_without_transformer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppBuilder::new(config(dir.path())).build().await;
        assert!(matches!(result, Err(SieveError::Config(_))));
    }

    #[tokio::test]
    async fn transform_command_is_used_when_nothing_injected() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            transform_command: Some("cp {input} {output}".into()),
            ..config(dir.path())
        };
        let app = AppBuilder::new(config).build().await.unwrap();
        app.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_fails_before_anything_starts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_backend: "object_store".into(),
            bucket: None,
            ..config(dir.path())
        };
        let result = AppBuilder::new(config)
            .transformer(Arc::new(Identity))
            .build()
            .await;
        assert!(matches!(result, Err(SieveError::Config(_))));
        assert!(!dir.path().join("store").exists());
    }

    #[tokio::test]
    async fn object_store_backend_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_backend: "object_store".into(),
            bucket: Some("media".into()),
            endpoint: "http://127.0.0.1:1".into(),
            ..config(dir.path())
        };
        // 認証情報なし: 構築はできる（まだどこにも接続しない）
        let app = AppBuilder::new(config)
            .transformer(Arc::new(Identity))
            .build()
            .await
            .unwrap();
        assert_eq!(app.storage.kind(), BackendKind::ObjectStore);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn injected_storage_wins() {
        let dir = tempfile::tempdir().unwrap();
        let app = AppBuilder::new(config(dir.path()))
            .storage(Arc::new(InMemoryBackend::new()))
            .transformer(Arc::new(Identity))
            .build()
            .await
            .unwrap();
        assert_eq!(app.storage.kind(), BackendKind::Memory);
        assert!(!dir.path().join("store").exists());
        app.shutdown().await;
    }
}
