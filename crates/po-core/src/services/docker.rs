//! [`ContainerEngine`] implementation that shells out to the `docker` CLI.

use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::models::{
    BuildSpec, ContainerInspect, ContainerSummary, RunSpec, StatsSample, Timeouts,
};

use super::engine::ContainerEngine;

static HOST_PORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(\d+)->").unwrap());

/// Raw result of one `docker` invocation.
#[derive(Debug)]
struct DockerOutput {
    success: bool,
    code: i32,
    stdout: String,
    stderr: String,
}

impl DockerOutput {
    fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            _ => self.stderr.trim_end().to_string(),
        }
    }
}

pub struct DockerCli {
    binary: String,
    timeouts: Timeouts,
}

impl DockerCli {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            binary: "docker".into(),
            timeouts,
        }
    }

    /// Use a different engine binary with a docker-compatible CLI (e.g. `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run one `docker` command, killing the child when the timeout expires or
    /// `cancel` fires. Non-zero exits are returned as output, not errors,
    /// except for an unreachable daemon.
    async fn run_docker(
        &self,
        args: &[&str],
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<DockerOutput> {
        tracing::debug!(command = %args.join(" "), "docker");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OrchestratorError::EngineUnavailable(format!("'{}' binary not found", self.binary))
            } else {
                OrchestratorError::EngineUnavailable(format!(
                    "failed to start {}: {e}",
                    self.binary
                ))
            }
        })?;

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        // Dropping the `wait_with_output` future drops the child, and
        // `kill_on_drop` terminates it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(OrchestratorError::Timeout {
                        operation: format!("{} {}", self.binary, args.first().unwrap_or(&"")),
                        seconds: timeout.as_secs(),
                    })
                }
            },
        };

        let output = DockerOutput {
            success: output.status.success(),
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !output.success && is_daemon_unreachable(&output.stderr) {
            return Err(OrchestratorError::EngineUnavailable(
                output.stderr.trim().to_string(),
            ));
        }
        Ok(output)
    }

    /// Run a command where any failure is an error, classifying "no such
    /// object" as `NotFound`.
    async fn run_checked(&self, args: &[&str], timeout: Duration, what: &str) -> Result<String> {
        let output = self.run_docker(args, timeout, None).await?;
        if output.success {
            return Ok(output.stdout);
        }
        Err(classify_failure(what, &output))
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn ping(&self) -> Result<()> {
        let output = self
            .run_docker(
                &["version", "--format", "{{.Server.Version}}"],
                self.timeouts.inspect(),
                None,
            )
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(OrchestratorError::EngineUnavailable(
                output.stderr.trim().to_string(),
            ))
        }
    }

    async fn build_image(&self, spec: &BuildSpec, cancel: &CancellationToken) -> Result<String> {
        let context = spec.context_dir.to_string_lossy().into_owned();
        let labels = label_args(&spec.labels);
        let mut args = vec!["build", "-t", spec.tag.as_str()];
        for label in &labels {
            args.extend_from_slice(&["--label", label.as_str()]);
        }
        args.push(&context);

        let output = self
            .run_docker(&args, self.timeouts.build(), Some(cancel))
            .await?;
        if output.success {
            Ok(output.combined())
        } else {
            Err(OrchestratorError::BuildFailed {
                tag: spec.tag.clone(),
                output: output.combined(),
            })
        }
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        match self
            .run_checked(
                &["image", "inspect", "--format", "{{.Id}}", reference],
                self.timeouts.inspect(),
                reference,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn run_container(&self, spec: &RunSpec, cancel: &CancellationToken) -> Result<String> {
        let publish = format!("{}:{}", spec.host_port, spec.container_port);
        let labels = label_args(&spec.labels);
        let env = label_args(&spec.env);
        let mut args = vec!["run", "-d", "--name", spec.name.as_str(), "-p", publish.as_str()];
        for label in &labels {
            args.extend_from_slice(&["--label", label.as_str()]);
        }
        for var in &env {
            args.extend_from_slice(&["-e", var.as_str()]);
        }
        args.push(&spec.image);

        let output = self
            .run_docker(&args, self.timeouts.run(), Some(cancel))
            .await?;
        if !output.success {
            return Err(OrchestratorError::StartFailed(output.combined()));
        }
        let id = output.stdout.trim().to_string();
        if id.is_empty() {
            return Err(OrchestratorError::StartFailed(
                "engine returned no container id".into(),
            ));
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run_checked(&["start", id], self.timeouts.run(), id)
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let grace_secs = grace.as_secs().to_string();
        // Outer bound leaves room for the engine's own kill after the grace period.
        let bound = grace + Duration::from_secs(10);
        self.run_checked(&["stop", "-t", &grace_secs, id], bound, id)
            .await
            .map(|_| ())
    }

    async fn kill_container(&self, id: &str) -> Result<()> {
        let output = self
            .run_docker(&["kill", id], self.timeouts.inspect(), None)
            .await?;
        if output.success || output.stderr.contains("is not running") {
            return Ok(());
        }
        Err(classify_failure(id, &output))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id);
        self.run_checked(&args, self.timeouts.run(), id)
            .await
            .map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let stdout = self
            .run_checked(
                &["inspect", "--type", "container", "--format", "{{.Id}} {{json .State}}", id],
                self.timeouts.inspect(),
                id,
            )
            .await?;
        parse_inspect(stdout.trim())
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample> {
        let stdout = self
            .run_checked(
                &["stats", "--no-stream", "--format", "{{json .}}", id],
                self.timeouts.inspect(),
                id,
            )
            .await?;
        Ok(parse_stats(stdout.trim()))
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = self
            .run_docker(&["logs", "--tail", &tail, id], self.timeouts.inspect(), None)
            .await?;
        if !output.success {
            return Err(classify_failure(id, &output));
        }
        Ok(output.combined())
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let filter = format!("label={label}");
        let stdout = self
            .run_checked(
                &["ps", "-a", "--no-trunc", "--filter", &filter, "--format", "{{json .}}"],
                self.timeouts.inspect(),
                "containers",
            )
            .await?;
        stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    async fn list_images(&self, label: &str) -> Result<Vec<String>> {
        let filter = format!("label={label}");
        let stdout = self
            .run_checked(
                &["images", "-q", "--no-trunc", "--filter", &filter],
                self.timeouts.inspect(),
                "images",
            )
            .await?;
        let mut seen = HashSet::new();
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| seen.insert(l.to_string()))
            .map(str::to_string)
            .collect())
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()> {
        let mut args = vec!["rmi"];
        if force {
            args.push("-f");
        }
        args.push(reference);
        self.run_checked(&args, self.timeouts.run(), reference)
            .await
            .map(|_| ())
    }
}

fn label_args(pairs: &BTreeMap<String, String>) -> Vec<String> {
    pairs.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
        || stderr.contains("error during connect")
}

fn is_missing_object(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such image")
        || lower.contains("no such object")
        || lower.contains("image not known")
        || lower.contains("no container with name or id")
}

fn classify_failure(what: &str, output: &DockerOutput) -> OrchestratorError {
    if is_missing_object(&output.stderr) {
        OrchestratorError::not_found(what)
    } else {
        OrchestratorError::Engine(format!(
            "exit {}: {}",
            output.code,
            output.stderr.trim()
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    names: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: String,
    #[serde(default)]
    ports: String,
}

/// Parse one `docker ps --format '{{json .}}'` line.
pub(crate) fn parse_ps_line(line: &str) -> Result<ContainerSummary> {
    let raw: PsLine = serde_json::from_str(line)?;
    let labels = raw
        .labels
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut host_ports: Vec<u16> = HOST_PORT_RE
        .captures_iter(&raw.ports)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    host_ports.sort_unstable();
    host_ports.dedup();
    Ok(ContainerSummary {
        id: raw.id,
        name: raw.names,
        image: raw.image,
        state: raw.state,
        labels,
        host_ports,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateJson {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    health: Option<HealthJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthJson {
    status: String,
}

/// Parse `<id> <State json>` as printed by the inspect format string.
pub(crate) fn parse_inspect(line: &str) -> Result<ContainerInspect> {
    let (id, json) = line
        .split_once(' ')
        .ok_or_else(|| OrchestratorError::Engine(format!("unexpected inspect output: {line}")))?;
    let state: StateJson = serde_json::from_str(json)?;
    let started_at = state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        // Never-started containers report year 1.
        .filter(|t| t.year() > 1);
    Ok(ContainerInspect {
        id: id.to_string(),
        running: state.running,
        status: state.status,
        exit_code: state.exit_code,
        started_at,
        health: state.health.map(|h| h.status),
    })
}

#[derive(Debug, Deserialize)]
struct StatsJson {
    #[serde(rename = "CPUPerc", default)]
    cpu: String,
    #[serde(rename = "MemPerc", default)]
    mem: String,
}

/// Parse a `docker stats --format '{{json .}}'` line. Unparseable readings
/// become `None`.
pub(crate) fn parse_stats(line: &str) -> StatsSample {
    match serde_json::from_str::<StatsJson>(line) {
        Ok(raw) => StatsSample {
            cpu_percent: parse_percent(&raw.cpu),
            memory_percent: parse_percent(&raw.mem),
        },
        Err(_) => StatsSample::default(),
    }
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').parse().ok()
}
