use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 优雅关闭管理器
///
/// 所有组件共享同一个取消信号，触发一次后永久生效。
#[derive(Debug, Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 供组件监听的取消信号
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 后台等待Ctrl+C或SIGTERM，收到后触发关闭
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = wait_for_shutdown_signal() => {
                    if let Err(e) = result {
                        error!("监听关闭信号失败: {:#}", e);
                    }
                    manager.shutdown();
                }
                _ = manager.wait_for_shutdown() => {}
            }
        })
    }
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => {
                info!("收到SIGTERM信号");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
