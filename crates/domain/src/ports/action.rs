use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

/// 任务的执行单元
///
/// 返回 `Err` 视为本次尝试失败，由执行Worker按重试策略处理。
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn execute(&self) -> anyhow::Result<()>;
}

/// 以闭包实现的任务动作
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn execute(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

pub fn action_fn<F, Fut>(f: F) -> Arc<dyn TaskAction>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnAction::new(f))
}

/// 从快照恢复时按 description 重新绑定任务动作
pub trait ActionResolver: Send + Sync {
    fn resolve(&self, description: &str) -> Option<Arc<dyn TaskAction>>;
}

impl<F> ActionResolver for F
where
    F: Fn(&str) -> Option<Arc<dyn TaskAction>> + Send + Sync,
{
    fn resolve(&self, description: &str) -> Option<Arc<dyn TaskAction>> {
        self(description)
    }
}

/// 按名称登记的动作表
#[derive(Clone, Default)]
pub struct ActionCatalog {
    actions: HashMap<String, Arc<dyn TaskAction>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Into<String>>(&mut self, description: S, action: Arc<dyn TaskAction>) {
        self.actions.insert(description.into(), action);
    }

    pub fn with_action<S: Into<String>>(mut self, description: S, action: Arc<dyn TaskAction>) -> Self {
        self.register(description, action);
        self
    }

    pub fn get(&self, description: &str) -> Option<Arc<dyn TaskAction>> {
        self.actions.get(description).cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl ActionResolver for ActionCatalog {
    fn resolve(&self, description: &str) -> Option<Arc<dyn TaskAction>> {
        self.get(description)
    }
}
