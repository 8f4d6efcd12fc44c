//! Impls - ports の実装
//!
//! # 含まれるもの
//! - **FilesystemBackend**: ローカルのルートディレクトリ配下に成果物を置く
//! - **ObjectStoreBackend**: S3 互換オブジェクトストア（AWS S3, MinIO, GCS interop）
//! - **InMemoryBackend**: 障害注入つきのプロセス内ストレージ（テスト用）
//! - **InMemoryTaskRegistry**: タスク registry
//! - **CommandTransformer**: 外部プログラムとして変換を実行
//! - **sigv4**: オブジェクトストア系バックエンドで共有するリクエスト署名と署名付き URL

pub mod command_transformer;
pub mod fs_storage;
pub mod inmem_registry;
pub mod inmem_storage;
pub mod object_store;
pub mod sigv4;

pub use self::command_transformer::CommandTransformer;
pub use self::fs_storage::FilesystemBackend;
pub use self::inmem_registry::InMemoryTaskRegistry;
pub use self::inmem_storage::InMemoryBackend;
pub use self::object_store::{ObjectStoreBackend, ObjectStoreSettings};
pub use self::sigv4::{Credentials, PresignError, Signer};
