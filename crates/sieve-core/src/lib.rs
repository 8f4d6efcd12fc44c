//! sieve-core
//!
//! 外部プロセスで動くメディア変換のためのタスク管理と、ストレージバックエンドの抽象化。
//!
//! 呼び出し側はバイト列を投入するとすぐに task id を受け取る。ワーカーが入力を
//! 手元に用意し、変換を実行し、結果を保存して結末を記録する。呼び出し側はステータスを
//! ポーリングし、完了後にダウンロード方法を解決する（署名付き URL を発行できる
//! バックエンドならリダイレクト、そうでなければ直接ストリーム）。
//!
//! # モジュール構成
//! - **domain**: タスクレコード、状態遷移、ID、保存先、エラー
//! - **ports**: `StorageBackend`, `TaskRegistry`, `Transformer`, `Clock`, `IdGenerator`
//! - **impls**: ファイルシステム / オブジェクトストア / インメモリのバックエンド、
//!   インメモリ registry、コマンド実行 transformer、SigV4 署名
//! - **app**: builder, processor, worker group, retrieval router
//! - **config**: `SIEVE_*` 環境変数による設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::app::{App, AppBuilder, DownloadDescriptor, TaskStatusView};
pub use self::config::Config;
pub use self::domain::{SieveError, TaskId, TaskStatus};
