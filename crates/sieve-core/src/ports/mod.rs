//! Ports - 抽象化レイヤー
//!
//! 各 trait はオーケストレーションの外側（成果物ストレージ、変換処理、時刻、ID 生成）
//! との境界。実装は `impls` に置き、アプリケーション層は trait だけを見る。

pub mod clock;
pub mod id_generator;
pub mod storage;
pub mod task_registry;
pub mod transformer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::storage::{SignedUrl, StorageBackend};
pub use self::task_registry::{TaskCounts, TaskRegistry};
pub use self::transformer::{ProgressReporter, Transformer};
