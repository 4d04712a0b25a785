use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use scheduler_domain::{SnapshotStore, TaskDefinition};
use scheduler_errors::{SchedulerError, SchedulerResult, TaskId};

use crate::observability::StructuredLogger;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// 快照文件内容，任务按ID为键保存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub tasks: BTreeMap<TaskId, TaskDefinition>,
}

impl SnapshotDocument {
    pub fn new(definitions: &[TaskDefinition]) -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            saved_at: Utc::now(),
            tasks: definitions
                .iter()
                .map(|definition| (definition.id, definition.clone()))
                .collect(),
        }
    }

    /// 校验版本与键的一致性后返回定义，按ID升序
    pub fn into_definitions(self) -> SchedulerResult<Vec<TaskDefinition>> {
        if self.version != SNAPSHOT_FORMAT_VERSION {
            return Err(SchedulerError::Serialization(format!(
                "不支持的快照版本: {} (当前版本 {})",
                self.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        self.tasks
            .into_iter()
            .map(|(key, definition)| {
                if key != definition.id {
                    return Err(SchedulerError::Serialization(format!(
                        "快照键 {} 与任务ID {} 不一致",
                        key, definition.id
                    )));
                }
                Ok(definition)
            })
            .collect()
    }
}

/// 基于JSON文件的快照存储
///
/// 先写临时文件再重命名，写入中途失败不会破坏已有快照。
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, definitions: &[TaskDefinition]) -> SchedulerResult<()> {
        let started = Instant::now();
        let document = SnapshotDocument::new(definitions);
        let content = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SchedulerError::persistence_error(format!("创建目录 {} 失败: {e}", parent.display()))
            })?;
        }

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &content).await.map_err(|e| {
            SchedulerError::persistence_error(format!("写入 {} 失败: {e}", temp_path.display()))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            SchedulerError::persistence_error(format!("替换 {} 失败: {e}", self.path.display()))
        })?;

        StructuredLogger::log_snapshot_saved(
            &self.path,
            definitions.len(),
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        Ok(())
    }

    async fn load(&self) -> SchedulerResult<Vec<TaskDefinition>> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SchedulerError::persistence_error(format!(
                    "快照文件不存在: {}",
                    self.path.display()
                )))
            }
            Err(e) => {
                return Err(SchedulerError::persistence_error(format!(
                    "读取 {} 失败: {e}",
                    self.path.display()
                )))
            }
        };

        let document: SnapshotDocument = serde_json::from_slice(&content)?;
        debug!(
            "读取快照 {}，保存于 {}",
            self.path.display(),
            document.saved_at
        );
        let definitions = document.into_definitions()?;
        StructuredLogger::log_snapshot_loaded(&self.path, definitions.len());
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn definition(id: TaskId, description: &str) -> TaskDefinition {
        TaskDefinition {
            id,
            description: description.to_string(),
            next_fire_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            priority: 2,
            cron_expression: Some("0 * * * *".to_string()),
            group_name: Some("reports".to_string()),
            max_retries: 3,
            timeout_ms: Some(1500),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("nested").join("tasks.json"));
        let saved = vec![definition(2, "b"), definition(1, "a")];

        store.save(&saved).await.unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![definition(1, "a"), definition(2, "b")]);
    }

    #[tokio::test]
    async fn test_file_is_keyed_by_id() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("tasks.json"));
        store.save(&[definition(7, "report")]).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["tasks"]["7"]["description"], "report");
        assert_eq!(raw["tasks"]["7"]["timeout_ms"], 1500);
        assert!(raw["tasks"]["7"].get("action").is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("missing.json"));
        let result = store.load().await;
        assert!(matches!(result, Err(SchedulerError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_and_mismatched_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let store = JsonSnapshotStore::new(&path);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(SchedulerError::Serialization(_))
        ));

        let mut document = SnapshotDocument::new(&[definition(1, "a")]);
        document.version = 99;
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();
        assert!(matches!(
            store.load().await,
            Err(SchedulerError::Serialization(_))
        ));

        let mut document = SnapshotDocument::new(&[]);
        document.tasks.insert(5, definition(6, "wrong key"));
        std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();
        assert!(matches!(
            store.load().await,
            Err(SchedulerError::Serialization(_))
        ));
    }
}
