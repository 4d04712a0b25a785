use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use scheduler_domain::TaskAction;

/// 通过系统 shell 执行命令的任务动作
///
/// 非零退出码视为失败，stderr 会附在错误信息中。
/// 超时取消执行时子进程随之被终止。
#[derive(Debug, Clone)]
pub struct ShellAction {
    command: String,
    working_dir: Option<PathBuf>,
    env_vars: HashMap<String, String>,
}

impl ShellAction {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env_vars: HashMap::new(),
        }
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl TaskAction for ShellAction {
    async fn execute(&self) -> anyhow::Result<()> {
        let start_time = Instant::now();
        debug!("执行Shell命令: {}", self.command);

        let output = self
            .build_command()
            .output()
            .await
            .with_context(|| format!("启动Shell命令失败: {}", self.command))?;

        let duration_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "命令执行失败，退出码: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        info!(
            "Shell命令执行完成: command={}, duration={}ms, output={}",
            self.command,
            duration_ms,
            stdout.trim()
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let action = ShellAction::new("echo hello");
        assert!(action.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let action = ShellAction::new("echo oops >&2; exit 3");
        let err = action.execute().await.unwrap_err().to_string();
        assert!(err.contains("Some(3)"), "unexpected error: {err}");
        assert!(err.contains("oops"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = std::env::temp_dir();
        let action = ShellAction::new("test \"$GREETING\" = hi && test \"$(pwd)\" != \"\"")
            .with_env("GREETING", "hi")
            .with_working_dir(&dir);
        assert!(action.execute().await.is_ok());
    }
}
