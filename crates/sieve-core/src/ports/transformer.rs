//! Transformer port - 外部の変換処理
//!
//! コアから見た変換は不透明な 1 ステップにすぎない。
//! ローカルの入力ファイルを渡し、ローカルの出力ファイルを受け取る（途中で進捗を報告してもよい）。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::TransformError;

/// ProgressReporter は transformer から processor へ進捗（%）を中継する
///
/// 中身は有界チャネルで、受信側は processor だけ。
/// `report` はブロックしない。チャネルが満杯なら値は捨てる（後の大きい値で上書きされる）。
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<u8>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<u8>) -> Self {
        Self { tx }
    }

    /// reporter と受信側を作る（未処理の値を `capacity` 個まで保持）
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<u8>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// 進捗を % で報告（100 を超える値は registry が丸める）
    pub fn report(&self, percent: u8) {
        let _ = self.tx.try_send(percent);
    }

    /// 何も受け取らない reporter
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Transformer はローカルファイルに対して変換を実行する
#[async_trait]
pub trait Transformer: Send + Sync {
    /// `input` を変換し、生成したファイルのパスを返す
    ///
    /// `workdir` はこの呼び出し専用の scratch ディレクトリ。出力はその中に書くこと
    /// （scratch と一緒に片付けられる）。
    async fn transform(
        &self,
        input: &Path,
        workdir: &Path,
        progress: ProgressReporter,
    ) -> Result<PathBuf, TransformError>;
}
