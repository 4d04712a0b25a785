//! 任务定义快照的持久化

pub mod json_snapshot;

pub use json_snapshot::{JsonSnapshotStore, SnapshotDocument, SNAPSHOT_FORMAT_VERSION};
