//! Errors - エラー型と分類
//!
//! - `StorageError`: `StorageBackend` が返すエラー
//! - `TransformError`: 外部の変換処理が返すエラー
//! - `TransitionError`: registry が拒否した不正な状態遷移
//! - `SieveError`: 呼び出し側に見せる crate 全体のエラー分類

use std::path::PathBuf;

use thiserror::Error;

use super::{TaskId, TaskStatus};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// ErrorKind は失敗の運用上の分類
///
/// # 分類
/// - Transient: 一時的なエラー（タイムアウト、5xx、スロットリング。再試行で通る可能性あり）
/// - Permanent: 恒久的なエラー（権限なし、不正なリクエスト。再試行は無意味）
/// - Infrastructure: バックエンド自体が使えない（設定ミス、認証情報なし）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

impl ErrorKind {
    fn describe(self) -> &'static str {
        match self {
            ErrorKind::Transient => "temporarily unavailable",
            ErrorKind::Permanent => "rejected the request",
            ErrorKind::Infrastructure => "is misconfigured or unreachable",
        }
    }
}

/// StorageError はストレージバックエンドのエラー
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error ({kind:?}): {message}")]
    Backend {
        kind: ErrorKind,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    pub fn backend(kind: ErrorKind, message: impl Into<String>) -> Self {
        StorageError::Backend {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        StorageError::Backend {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Map a filesystem error for `path`. `NotFound` becomes `StorageError::NotFound`.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => return StorageError::NotFound(path.to_string()),
            Io::PermissionDenied | Io::InvalidInput | Io::AlreadyExists => ErrorKind::Permanent,
            Io::Interrupted | Io::TimedOut | Io::WouldBlock => ErrorKind::Transient,
            _ => ErrorKind::Infrastructure,
        };
        StorageError::with_source(kind, format!("i/o failure on {path}"), err)
    }

    /// `None` for `NotFound`.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            StorageError::NotFound(_) => None,
            StorageError::Backend { kind, .. } => Some(*kind),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == Some(ErrorKind::Transient)
    }
}

/// TransformError は外部の変換処理のエラー
///
/// `Display` はログ用で、変換処理の出力やローカルパスを含むことがある。
/// タスクレコードに入るのは `classified()` の方。
#[derive(Debug, Error)]
pub enum TransformError {
    /// The collaborator ran and reported failure.
    #[error("{0}")]
    Failed(String),

    /// An external transformer process exited unsuccessfully.
    #[error("transformer exited with {}", exit_label(.code))]
    Exited { code: Option<i32> },

    /// The collaborator reported success but produced nothing.
    #[error("transformer produced no output at {0}")]
    MissingOutput(PathBuf),

    /// The collaborator's output file is empty.
    #[error("transformer produced an empty file at {0}")]
    EmptyOutput(PathBuf),

    #[error("transformer i/o: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

impl TransformError {
    /// 呼び出し側に見せてよい固定文言。変換処理の出力やパスは含めない
    pub fn classified(&self) -> String {
        let reason = match self {
            TransformError::Failed(_) => "transformer reported an error".to_string(),
            TransformError::Exited { code: Some(code) } => {
                format!("transformer exited with status {code}")
            }
            TransformError::Exited { code: None } => {
                "transformer was terminated by a signal".to_string()
            }
            TransformError::MissingOutput(_) => "transformer produced no output".to_string(),
            TransformError::EmptyOutput(_) => "transformer produced an empty file".to_string(),
            TransformError::Io(_) => "could not run the transformer".to_string(),
        };
        format!("processing failed: {reason}")
    }
}

/// 不正な状態遷移
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition for {task_id}: {from} -> {to}")]
    Illegal {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("input already attached to {task_id} (status {status})")]
    InputAlreadyAttached { task_id: TaskId, status: TaskStatus },
}

/// SieveError は crate 全体のエラー分類
#[derive(Debug, Error)]
pub enum SieveError {
    /// Malformed or missing submission input; no task was created.
    #[error("invalid submission: {0}")]
    Validation(String),

    /// Unknown task id, or a backend object that is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Download requested before the task finished.
    #[error("task {task_id} is not ready (status {status})")]
    NotReady { task_id: TaskId, status: TaskStatus },

    /// Storage I/O failure.
    #[error(transparent)]
    Backend(StorageError),

    /// The transformation collaborator failed.
    #[error("processing failed: {0}")]
    Processing(#[from] TransformError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The processor no longer accepts work.
    #[error("processor is shutting down")]
    ShuttingDown,

    /// Startup configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal fault (a worker panicked, a lock was poisoned, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for SieveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => SieveError::NotFound(format!("object {path}")),
            other => SieveError::Backend(other),
        }
    }
}

const MAX_DETAIL_LEN: usize = 240;

impl SieveError {
    pub fn task_not_found(task_id: TaskId) -> Self {
        SieveError::NotFound(format!("task {task_id}"))
    }

    /// タスクの `error_detail` に入れる、呼び出し側に見せてよい文言
    ///
    /// ストレージと変換の失敗は分類だけに落とす（生のテキストはログにだけ残る）
    pub fn classified(&self) -> String {
        match self {
            SieveError::Backend(err) => match err.kind() {
                Some(kind) => format!("storage backend {}", kind.describe()),
                None => "stored artifact is missing".to_string(),
            },
            SieveError::NotFound(_) => "stored artifact is missing".to_string(),
            SieveError::Processing(err) => err.classified(),
            SieveError::Internal(_) => "internal error while processing".to_string(),
            SieveError::ShuttingDown => "processor shut down".to_string(),
            other => truncate(&other.to_string()),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_DETAIL_LEN {
        return s.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = StorageError::from_io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            "uploads/a",
        );
        assert!(matches!(err, StorageError::NotFound(ref p) if p == "uploads/a"));
        assert!(matches!(SieveError::from(err), SieveError::NotFound(_)));
    }

    #[test]
    fn io_permission_is_permanent() {
        let err = StorageError::from_io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
            "uploads/a",
        );
        assert_eq!(err.kind(), Some(ErrorKind::Permanent));
        assert!(!err.is_transient());
    }

    #[test]
    fn classified_backend_hides_raw_text() {
        let err: SieveError = StorageError::backend(
            ErrorKind::Transient,
            "connection reset by peer at 10.0.0.7:9000",
        )
        .into();
        let detail = err.classified();
        assert_eq!(detail, "storage backend temporarily unavailable");
        assert!(!detail.contains("10.0.0.7"));
    }

    #[rstest]
    #[case(
        TransformError::Failed("Traceback: File \"/srv/app/model.py\", line 9".into()),
        "processing failed: transformer reported an error"
    )]
    #[case(
        TransformError::Exited { code: Some(1) },
        "processing failed: transformer exited with status 1"
    )]
    #[case(
        TransformError::Exited { code: None },
        "processing failed: transformer was terminated by a signal"
    )]
    #[case(
        TransformError::MissingOutput(PathBuf::from("/tmp/scratch/task-x/output.mp4")),
        "processing failed: transformer produced no output"
    )]
    #[case(
        TransformError::EmptyOutput(PathBuf::from("/tmp/scratch/task-x/output.mp4")),
        "processing failed: transformer produced an empty file"
    )]
    fn classified_processing_is_fixed_text(#[case] err: TransformError, #[case] expected: &str) {
        let detail = SieveError::from(err).classified();
        assert_eq!(detail, expected);
        assert!(!detail.contains('/'));
    }

    #[test]
    fn classified_processing_io_hides_os_text() {
        let err = SieveError::from(TransformError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/opt/bin/remover: permission denied",
        )));
        assert_eq!(err.classified(), "processing failed: could not run the transformer");
    }

    #[test]
    fn log_text_keeps_collaborator_detail() {
        let err = SieveError::from(TransformError::Failed("no frames decoded".into()));
        assert_eq!(err.to_string(), "processing failed: no frames decoded");
    }

    #[test]
    fn classified_is_truncated() {
        let err = SieveError::Validation("x".repeat(1000));
        let detail = err.classified();
        assert!(detail.len() <= MAX_DETAIL_LEN + 3);
        assert!(detail.ends_with("..."));
    }
}
