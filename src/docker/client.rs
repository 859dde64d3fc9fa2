//! Docker CLI implementation of the runtime and registry interfaces.
//!
//! All `docker` subprocesses are constructed here, with consistent timeout
//! handling and error mapping to [`DockerError`].

use super::DockerError;
use crate::runtime::{
    BuildRequest, ChunkStream, ContainerInfo, ContainerRuntime, ImageInfo, Registry, RunSpec,
    RuntimeError, VolumeInfo,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Cap for commands that legitimately run long (pull, push, wait).
const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

type ChunkSender = mpsc::Sender<Result<Vec<u8>, RuntimeError>>;

#[derive(Debug, Clone)]
pub struct DockerClient {
    timeout: Duration,
}

impl DockerClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }

    /// Per-command timeout for short calls (inspect, stop, rm, ...).
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Run a docker command with a timeout, returning raw Output.
    async fn run_raw(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));
        tracing::trace!("{}", cmd_str);

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker")
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Run a docker command, returning Output only if exit 0.
    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let output = self.run_raw(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(DockerError::failed(format!("docker {}", args.join(" ")), &output))
        }
    }

    /// Run with inherited stdio so the user sees progress and can answer prompts.
    async fn run_interactive(&self, args: &[&str]) -> Result<(), DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));
        let status = tokio::process::Command::new("docker")
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(DockerError::cmd_failed(cmd_str, "command failed", status.code()))
        }
    }

    fn stdout_lines(output: &Output) -> Vec<String> {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// `docker inspect` of several objects, returning the parsed array.
    ///
    /// `Ok(None)` when any of them does not exist.
    async fn inspect_json(&self, kind: &str, names: &[&str]) -> Result<Option<Vec<Value>>, DockerError> {
        let type_flag = format!("--type={}", kind);
        let mut args = vec!["inspect", type_flag.as_str()];
        args.extend_from_slice(names);

        match self.run_success(&args, self.timeout).await {
            Ok(output) => {
                let parsed: Value = serde_json::from_slice(&output.stdout)
                    .map_err(|e| DockerError::unexpected("docker inspect", e.to_string()))?;
                match parsed {
                    Value::Array(items) => Ok(Some(items)),
                    other => Err(DockerError::unexpected(
                        "docker inspect",
                        format!("expected an array, got {}", other),
                    )),
                }
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn labels_at(value: &Value, pointer: &str) -> BTreeMap<String, String> {
        value
            .pointer(pointer)
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn str_at(value: &Value, pointer: &str) -> String {
        value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn container_from_json(value: &Value) -> ContainerInfo {
        let volumes = value
            .get("Mounts")
            .and_then(Value::as_array)
            .map(|mounts| {
                mounts
                    .iter()
                    .filter(|m| m.get("Type").and_then(Value::as_str) == Some("volume"))
                    .filter_map(|m| m.get("Name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        ContainerInfo {
            name: Self::str_at(value, "/Name").trim_start_matches('/').to_string(),
            id: Self::str_at(value, "/Id"),
            image_id: Self::str_at(value, "/Image"),
            running: value
                .pointer("/State/Running")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            labels: Self::labels_at(value, "/Config/Labels"),
            volumes,
        }
    }

    fn image_from_json(value: &Value) -> ImageInfo {
        ImageInfo {
            id: Self::str_at(value, "/Id"),
            tags: value
                .get("RepoTags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            labels: Self::labels_at(value, "/Config/Labels"),
        }
    }

    fn volume_from_json(value: &Value) -> VolumeInfo {
        VolumeInfo {
            name: Self::str_at(value, "/Name"),
            labels: Self::labels_at(value, "/Labels"),
        }
    }

    /// `docker run -d` arguments for `spec`.
    pub fn run_args(spec: &RunSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.environment {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mount in &spec.mounts {
            args.push("-v".to_string());
            match mount.modes.to_option_string() {
                Some(opts) => args.push(format!("{}:{}:{}", mount.volume, mount.path, opts)),
                None => args.push(format!("{}:{}", mount.volume, mount.path)),
            }
        }
        for link in &spec.links {
            args.push("--link".to_string());
            args.push(format!("{}:{}", link.container, link.alias));
        }
        if let Some(bytes) = spec.mem_limit {
            args.push("--memory".to_string());
            args.push(bytes.to_string());
        }
        for port in &spec.ports {
            args.push("-p".to_string());
            args.push(port.clone());
        }
        args.push(spec.image.clone());
        if let Some(command) = &spec.command {
            args.extend(command.iter().cloned());
        }
        args
    }

    /// `docker build` arguments for `request`.
    pub fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--progress=plain".to_string(),
            "-t".to_string(),
            request.image.clone(),
            "-f".to_string(),
            request.dockerfile.display().to_string(),
        ];
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        if request.no_cache {
            args.push("--no-cache".to_string());
        }
        args.push(request.context.display().to_string());
        args
    }

    /// Forward `reader` line by line, so stdout and stderr only interleave at
    /// line boundaries. Resolves to the last non-empty line.
    fn forward<R>(reader: Option<R>, tx: ChunkSender) -> tokio::task::JoinHandle<Option<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader?);
            let mut last = None;
            loop {
                let mut line = Vec::new();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line).trim().to_string();
                        if !text.is_empty() {
                            last = Some(text);
                        }
                        if tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(RuntimeError::Other(format!(
                                "reading build output: {}",
                                e
                            ))))
                            .await;
                        break;
                    }
                }
            }
            last
        })
    }

    /// Error for a `docker build` that exited non-zero.
    ///
    /// A failing build step ends stderr with the builder's own error, a lost
    /// daemon with the connection error. Only the latter classifies as
    /// transient.
    pub fn build_failure(
        command: &str,
        last_stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> DockerError {
        let stderr = last_stderr.unwrap_or_else(|| "image build failed".to_string());
        DockerError::cmd_failed(command, stderr, exit_code)
    }

    // ========================================================================
    // Daemon health
    // ========================================================================

    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run_raw(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ping(&self) -> Result<(), RuntimeError> {
        if super::check_daemon_with_retry(self, 5, self.timeout).await {
            Ok(())
        } else {
            Err(DockerError::DaemonUnavailable.into())
        }
    }

    async fn build(&self, request: &BuildRequest) -> Result<ChunkStream, RuntimeError> {
        let args = Self::build_args(request);
        let cmd_str = format!("docker {}", args.join(" "));
        tracing::debug!("{}", cmd_str);

        let mut child = tokio::process::Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        let (tx, rx) = mpsc::channel(64);
        let stdout_task = Self::forward(child.stdout.take(), tx.clone());
        let stderr_task = Self::forward(child.stderr.take(), tx.clone());

        tokio::spawn(async move {
            let _ = stdout_task.await;
            let last_stderr = stderr_task.await.ok().flatten();
            let outcome = match child.wait().await {
                Ok(status) if status.success() => None,
                Ok(status) => Some(Self::build_failure(&cmd_str, last_stderr, status.code())),
                Err(e) => Some(DockerError::exec_failed(cmd_str, e)),
            };
            if let Some(err) = outcome {
                let _ = tx.send(Err(err.into())).await;
            }
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn run(&self, spec: &RunSpec) -> Result<String, RuntimeError> {
        let args = Self::run_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, self.timeout).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        Ok(self
            .inspect_json("container", &[name])
            .await?
            .and_then(|items| items.first().map(Self::container_from_json)))
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageInfo>, RuntimeError> {
        Ok(self
            .inspect_json("image", &[image])
            .await?
            .and_then(|items| items.first().map(Self::image_from_json)))
    }

    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeInfo>, RuntimeError> {
        Ok(self
            .inspect_json("volume", &[name])
            .await?
            .and_then(|items| items.first().map(Self::volume_from_json)))
    }

    async fn list_containers(
        &self,
        label: Option<&str>,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let filter = label.map(|l| format!("label={}", l));
        let mut args = vec!["ps", "-a", "-q", "--no-trunc"];
        if let Some(filter) = &filter {
            args.push("--filter");
            args.push(filter);
        }
        let ids = Self::stdout_lines(&self.run_success(&args, self.timeout).await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        // A container can vanish between `ps` and `inspect`; an empty answer is fine.
        Ok(self
            .inspect_json("container", &refs)
            .await?
            .unwrap_or_default()
            .iter()
            .map(Self::container_from_json)
            .collect())
    }

    async fn list_images(&self, reference: Option<&str>) -> Result<Vec<ImageInfo>, RuntimeError> {
        let filter = reference.map(|r| format!("reference={}", r));
        let mut args = vec!["images", "-q", "--no-trunc"];
        if let Some(filter) = &filter {
            args.push("--filter");
            args.push(filter);
        }
        let mut ids = Self::stdout_lines(&self.run_success(&args, self.timeout).await?);
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .inspect_json("image", &refs)
            .await?
            .unwrap_or_default()
            .iter()
            .map(Self::image_from_json)
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, RuntimeError> {
        let names = Self::stdout_lines(
            &self
                .run_success(&["volume", "ls", "-q"], self.timeout)
                .await?,
        );
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        Ok(self
            .inspect_json("volume", &refs)
            .await?
            .unwrap_or_default()
            .iter()
            .map(Self::volume_from_json)
            .collect())
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.run_success(&["tag", source, target], self.timeout)
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let grace = grace.as_secs().to_string();
        match self
            .run_success(&["stop", "-t", &grace, name], self.timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        match self.run_success(&["rm", "-f", name], self.timeout).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let label_args: Vec<String> = labels
            .iter()
            .flat_map(|(k, v)| ["--label".to_string(), format!("{}={}", k, v)])
            .collect();
        let mut args = vec!["volume", "create"];
        args.extend(label_args.iter().map(String::as_str));
        args.push(name);
        self.run_success(&args, self.timeout).await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .run_success(&["volume", "rm", name], self.timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let tail_str = tail.to_string();
        let output = self
            .run_success(&["logs", "--tail", &tail_str, name], self.timeout)
            .await?;
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(str::to_string)
            .collect();
        if lines.len() > tail {
            lines.drain(..lines.len() - tail);
        }
        Ok(lines)
    }

    async fn copy_into(
        &self,
        container: &str,
        source: &Path,
        dest: &str,
    ) -> Result<(), RuntimeError> {
        let source = source.display().to_string();
        let target = format!("{}:{}", container, dest);
        self.run_success(&["cp", &source, &target], LONG_COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn wait(&self, name: &str) -> Result<i64, RuntimeError> {
        let output = self
            .run_success(&["wait", name], LONG_COMMAND_TIMEOUT)
            .await?;
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        raw.parse::<i64>().map_err(|_| {
            DockerError::unexpected(format!("docker wait {}", name), format!("exit code '{}'", raw))
                .into()
        })
    }

    async fn exec(&self, name: &str, command: &str) -> Result<i32, RuntimeError> {
        let output = self
            .run_raw(&["exec", name, "/bin/sh", "-c", command], self.timeout)
            .await?;
        Ok(output.status.code().unwrap_or(-1))
    }
}

#[async_trait]
impl Registry for DockerClient {
    async fn login(&self, registry: &str) -> Result<(), RuntimeError> {
        self.run_interactive(&["login", registry]).await?;
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), RuntimeError> {
        self.run_interactive(&["push", image]).await?;
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.run_success(&["pull", image], LONG_COMMAND_TIMEOUT).await {
            Ok(_) => Ok(true),
            Err(DockerError::CommandFailed { ref stderr, .. })
                if ["not found", "manifest unknown", "pull access denied", "does not exist"]
                    .iter()
                    .any(|m| stderr.to_lowercase().contains(m)) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self
            .run_success(&["manifest", "inspect", image], self.timeout)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(DockerError::CommandFailed { ref stderr, .. })
                if stderr.to_lowercase().contains("manifest unknown") =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
