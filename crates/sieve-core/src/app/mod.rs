//! App - アプリケーション層
//!
//! ports を組み合わせて、呼び出し側に見せる 3 つの操作を提供する:
//! `submit`, `status`, `resolve_download`
//!
//! # 構成要素
//! - **AppBuilder**: 設定、バックエンド選択、配線
//! - **TaskProcessor**: 投入とタスクごとのパイプライン
//! - **WorkerGroup**: processor のキューを消化するワーカー群
//! - **RetrievalRouter**: 完了タスクをリダイレクトするかストリームするかの判断
//! - **ScratchSpace**: タスクごとの作業ディレクトリのガード
//! - **RetryPolicy**: 出力アップロードの再試行

pub mod builder;
pub mod processor;
pub mod retrieval;
pub mod retry;
pub mod scratch;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder};
pub use self::processor::{JobReceiver, ProcessorSettings, TaskProcessor, sanitize_name};
pub use self::retrieval::{DEFAULT_SIGNED_URL_TTL, DownloadDescriptor, RetrievalRouter};
pub use self::retry::RetryPolicy;
pub use self::scratch::ScratchSpace;
pub use self::status::TaskStatusView;
pub use self::worker_loop::WorkerGroup;
