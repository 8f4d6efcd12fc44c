//! ScratchSpace - per-task local working directory.
//!
//! One directory per pipeline run, named `{task_id}-XXXXXX` under the configured
//! scratch root. The directory is removed when the guard is closed or dropped,
//! including when the run unwinds from a panic.
//!
//! Creation and `close()` run on the blocking pool: removing a directory that holds
//! multi-megabyte media must not stall the runtime threads serving status polls.
//! `Drop` (the panic path) removes inline.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::domain::TaskId;

#[derive(Debug)]
pub struct ScratchSpace {
    task_id: TaskId,
    dir: TempDir,
}

impl ScratchSpace {
    /// Create a fresh directory for `task_id` under `root` (created if absent).
    pub async fn create(root: &Path, task_id: TaskId) -> io::Result<Self> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix(&format!("{task_id}-"))
                .tempdir_in(&root)
        })
        .await
        .map_err(io::Error::other)??;
        debug!(task_id = %task_id, path = %dir.path().display(), "scratch space created");
        Ok(Self { task_id, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory now and log if that fails.
    ///
    /// Dropping the guard also removes it, but silently.
    pub async fn close(self) {
        let Self { task_id, dir } = self;
        let path = dir.path().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(io::Error::other)
            .and_then(|r| r);
        match removed {
            Ok(()) => debug!(task_id = %task_id, "scratch space removed"),
            Err(err) => warn!(
                task_id = %task_id,
                path = %path.display(),
                error = %err,
                "failed to remove scratch space"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use ulid::Ulid;

    fn entries(root: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn directory_is_named_after_task() {
        let root = tempfile::tempdir().unwrap();
        let id = TaskId::from(Ulid::new());
        let scratch = ScratchSpace::create(root.path(), id).await.unwrap();

        let name = scratch.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{id}-")), "{name}");
        assert!(scratch.path().is_dir());
        assert_eq!(scratch.file("input.mp4"), scratch.path().join("input.mp4"));
    }

    #[tokio::test]
    async fn close_removes_contents() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::create(root.path(), TaskId::from(Ulid::new()))
            .await
            .unwrap();
        std::fs::write(scratch.file("a"), b"1").unwrap();
        std::fs::create_dir(scratch.file("nested")).unwrap();
        std::fs::write(scratch.file("nested/b"), b"2").unwrap();

        scratch.close().await;
        assert!(entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        {
            let scratch = ScratchSpace::create(root.path(), TaskId::from(Ulid::new()))
                .await
                .unwrap();
            std::fs::write(scratch.file("a"), b"1").unwrap();
        }
        assert!(entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn concurrent_tasks_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let (a, b) = tokio::join!(
            ScratchSpace::create(root.path(), TaskId::from(Ulid::new())),
            ScratchSpace::create(root.path(), TaskId::from(Ulid::new())),
        );
        assert_ne!(a.unwrap().path(), b.unwrap().path());
    }

    #[tokio::test]
    async fn root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("x/y");
        let scratch = ScratchSpace::create(&nested, TaskId::from(Ulid::new()))
            .await
            .unwrap();
        assert!(scratch.path().starts_with(&nested));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn runtime_keeps_serving_while_a_large_tree_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::create(root.path(), TaskId::from(Ulid::new()))
            .await
            .unwrap();
        for i in 0..2000 {
            std::fs::write(scratch.file(&format!("frame-{i}.png")), [0u8; 512]).unwrap();
        }

        let ticks = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            let done = done.clone();
            async move {
                while !done.load(Ordering::Acquire) {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        // single runtime thread: the ticker only runs if close() yields to it
        scratch.close().await;
        done.store(true, Ordering::Release);
        ticker.await.unwrap();

        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert!(entries(root.path()).is_empty());
    }
}
