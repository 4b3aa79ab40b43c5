use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::config::AcquireSection;
use crate::invoker::ToolInvoker;

use super::{AcquireError, AcquireResult, AcquireStrategy, AcquireTarget, MediaMetadata};

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    width: Option<i64>,
    height: Option<i64>,
}

/// Drives the yt-dlp binary for anything it recognizes. First in line for
/// every host.
pub struct YtDlpStrategy {
    path: String,
    user_agent: String,
    proxy: Option<String>,
    rate_limit: Option<String>,
    invoker: ToolInvoker,
}

impl YtDlpStrategy {
    pub fn new(config: &AcquireSection, invoker: ToolInvoker) -> Self {
        Self {
            path: config.ytdlp_path.clone(),
            user_agent: config.user_agent.clone(),
            proxy: config.proxy().map(str::to_string),
            rate_limit: config.rate_limit().map(str::to_string),
            invoker,
        }
    }

    fn base_command(&self, url: &Url) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg("--user-agent")
            .arg(&self.user_agent)
            .arg("--no-check-certificate")
            .arg("--geo-bypass")
            .arg("--no-playlist");
        if let Some(proxy) = &self.proxy {
            command.arg("--proxy").arg(proxy);
        }
        if let Some(rate) = &self.rate_limit {
            command.arg("--limit-rate").arg(rate);
        }
        if is_youtube(url) {
            command.arg("--concurrent-fragments").arg("5");
        }
        command
    }
}

fn is_youtube(url: &Url) -> bool {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    ["youtube.com", "youtu.be"]
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

fn stderr_tail(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl AcquireStrategy for YtDlpStrategy {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self, url: &Url) -> AcquireResult<Option<MediaMetadata>> {
        let mut command = self.base_command(url);
        command
            .arg("--skip-download")
            .arg("--print-json")
            .arg(url.as_str());
        let output = self.invoker.run(&mut command).await?;
        if !output.success() {
            debug!(stderr = %stderr_tail(&output.stderr_utf8()), "yt-dlp probe failed");
            return Ok(None);
        }
        let info: YtDlpInfo = match serde_json::from_slice(&output.stdout) {
            Ok(info) => info,
            Err(err) => {
                debug!(error = %err, "yt-dlp probe produced unparseable json");
                return Ok(None);
            }
        };
        Ok(Some(MediaMetadata {
            title: info.title,
            description: info.description,
            duration_seconds: info.duration,
            width: info.width,
            height: info.height,
        }))
    }

    async fn fetch(&self, url: &Url, target: &AcquireTarget) -> AcquireResult<PathBuf> {
        std::fs::create_dir_all(&target.dir).map_err(|source| AcquireError::Io {
            path: target.dir.clone(),
            source,
        })?;
        let mut command = self.base_command(url);
        command
            .arg("--format")
            .arg("best[ext=mp4]/best")
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("-o")
            .arg(target.template())
            .arg(url.as_str());
        let output = self.invoker.run(&mut command).await?;
        if !output.success() {
            return Err(AcquireError::ToolFailed {
                tool: "yt-dlp".to_string(),
                detail: stderr_tail(&output.stderr_utf8()),
            });
        }
        target.find_result().ok_or_else(|| AcquireError::ToolFailed {
            tool: "yt-dlp".to_string(),
            detail: "reported success but wrote no file".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::invoker::CommandExecutor;

    use super::*;

    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn recorded(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
            let std_command = command.as_std();
            let mut argv = vec![std_command.get_program().to_string_lossy().into_owned()];
            argv.extend(
                std_command
                    .get_args()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            );
            self.calls.lock().unwrap().push(argv);
            Ok(Output {
                status: ExitStatus::from_raw(0),
                stdout: b"{\"title\": \"clip\"}".to_vec(),
                stderr: Vec::new(),
            })
        }
    }

    fn section() -> AcquireSection {
        AcquireSection {
            ytdlp_path: "yt-dlp".to_string(),
            own_domains: vec!["clipforge.dev".to_string()],
            proxy_url: String::new(),
            rate_limit: String::new(),
            max_duration_seconds: 7200,
            timeout_seconds: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) TestShell/1.0".to_string(),
        }
    }

    fn strategy(executor: Arc<RecordingExecutor>) -> YtDlpStrategy {
        let invoker = ToolInvoker::new(executor, Duration::from_secs(5));
        YtDlpStrategy::new(&section(), invoker)
    }

    fn has_pair(argv: &[String], flag: &str, value: &str) -> bool {
        argv.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[tokio::test]
    async fn probe_passes_configured_user_agent() {
        let executor = RecordingExecutor::new();
        let strategy = strategy(Arc::clone(&executor));
        let url = Url::parse("https://clips.example.com/watch/42").unwrap();

        let metadata = strategy.probe(&url).await.unwrap().unwrap();
        assert_eq!(metadata.title.as_deref(), Some("clip"));

        let calls = executor.recorded();
        assert_eq!(calls.len(), 1);
        let ua = &section().user_agent;
        assert!(has_pair(&calls[0], "--user-agent", ua), "argv: {:?}", calls[0]);
        assert!(calls[0].contains(&"--skip-download".to_string()));
        assert!(!calls[0].contains(&"--concurrent-fragments".to_string()));
    }

    #[tokio::test]
    async fn fetch_passes_user_agent_and_youtube_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let executor = RecordingExecutor::new();
        let strategy = strategy(Arc::clone(&executor));
        let url = Url::parse("https://www.youtube.com/watch?v=abc123").unwrap();
        let target = AcquireTarget {
            dir: dir.path().to_path_buf(),
            slug: "abc12345".to_string(),
        };

        // The fake executor writes nothing, so fetch reports a tool failure.
        let result = strategy.fetch(&url, &target).await;
        assert!(result.is_err());

        let calls = executor.recorded();
        assert_eq!(calls.len(), 1);
        let ua = &section().user_agent;
        assert!(has_pair(&calls[0], "--user-agent", ua), "argv: {:?}", calls[0]);
        assert!(has_pair(&calls[0], "--concurrent-fragments", "5"));
        assert!(has_pair(&calls[0], "--merge-output-format", "mp4"));
    }
}
