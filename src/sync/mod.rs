pub mod engine;
pub mod kubectl;
pub mod rebuild;
pub mod runtime;
pub mod watcher;
pub mod wrapper;

pub use engine::{mode_str, strategy_str, SyncEngine, SyncOptions, SyncPlan};
pub use runtime::{DetectedRuntime, RestartMode};
pub use watcher::{spawn_session, SyncHandle, SyncSessionInfo};
