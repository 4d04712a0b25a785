use async_trait::async_trait;

use crate::entities::TaskDefinition;
use scheduler_errors::SchedulerResult;

/// 任务定义快照存储
///
/// 只保存定义，不保存执行动作与运行时状态。
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, definitions: &[TaskDefinition]) -> SchedulerResult<()>;

    /// 按ID升序返回快照中的全部定义
    async fn load(&self) -> SchedulerResult<Vec<TaskDefinition>>;
}
