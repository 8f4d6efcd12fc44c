//! Domain - ドメインモデル（ID、ステータス、タスクレコード、保存先、エラー）

pub mod errors;
pub mod ids;
pub mod location;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, SieveError, StorageError, TransformError, TransitionError};
pub use self::ids::{ParseTaskIdError, TaskId};
pub use self::location::{BackendKind, ParseBackendKindError, StorageLocation};
pub use self::state::TaskStatus;
pub use self::task::Task;
