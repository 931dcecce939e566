//! Provider Dispatcher (spec §4.3/§4.4): priority-ordered fallback over
//! heterogeneous LLM CLI adapters, each gated by a per-provider circuit
//! breaker. The child-process spawn/timeout/kill technique is a
//! vendor-agnostic "write prompt to stdin, read stdout/stderr, enforce a
//! deadline" contract applied across six distinct CLI vendors instead of
//! one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::state::ProviderResult;
use crate::store::CircuitBreakerStorePort;

const DISPATCH_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    Copilot,
    Cursor,
    Codex,
    Claude,
    Ollama,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI",
            Provider::Copilot => "COPILOT",
            Provider::Cursor => "CURSOR",
            Provider::Codex => "CODEX",
            Provider::Claude => "CLAUDE",
            Provider::Ollama => "OLLAMA",
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Copilot => "copilot",
            Provider::Cursor => "cursor-agent",
            Provider::Codex => "codex",
            Provider::Claude => "claude",
            Provider::Ollama => "ollama",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "GEMINI" => Some(Provider::Gemini),
            "COPILOT" => Some(Provider::Copilot),
            "CURSOR" => Some(Provider::Cursor),
            "CODEX" => Some(Provider::Codex),
            "CLAUDE" => Some(Provider::Claude),
            "OLLAMA" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn default_priority() -> Vec<Provider> {
        vec![
            Provider::Gemini,
            Provider::Copilot,
            Provider::Cursor,
            Provider::Codex,
            Provider::Claude,
            Provider::Ollama,
        ]
    }
}

/// Per-provider substring → error-kind table (spec §4.3). Checked in
/// declaration order; the first matching kind wins.
const ERROR_KIND_TABLE: &[(&str, &str)] = &[
    ("resource_exhausted", "resource_exhausted"),
    ("rate_limit", "rate_limit"),
    ("rate limit", "rate_limit"),
    ("quota_exceeded", "quota_exceeded"),
    ("quota exceeded", "quota_exceeded"),
    ("api_error", "api_error"),
    ("unauthorized", "unauthorized"),
    ("expired_token", "expired_token"),
    ("expired token", "expired_token"),
];

fn classify_error_kind(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    ERROR_KIND_TABLE
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, kind)| *kind)
}

/// True when `result` should trip the breaker for `provider` (spec §4.3
/// step 3). Only provider-side failures count: a clean exit with clean
/// content never trips, even if the text happens to mention these words
/// in passing (e.g. echoing back a task description).
fn should_trip(result: &ProviderResult) -> Option<&'static str> {
    if result.exit_code == 0 && result.status.as_deref() != Some("FAILED") {
        return None;
    }
    classify_error_kind(&result.raw_output())
}

pub struct DispatchRequest<'a> {
    pub prompt: &'a str,
    pub cwd: &'a Path,
    pub agent_mode: Option<&'a str>,
    pub session_id: Option<&'a str>,
    pub feature_id: Option<&'a str>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn invoke(&self, provider: Provider, req: &DispatchRequest<'_>) -> anyhow::Result<ProviderResult>;
}

/// Spawns the provider's CLI binary as a child process, writes the prompt to
/// stdin, and collects stdout/stderr under a hard deadline.
pub struct ProcessProviderAdapter {
    pub extra_args: HashMap<Provider, Vec<String>>,
}

impl ProcessProviderAdapter {
    pub fn new() -> Self {
        ProcessProviderAdapter {
            extra_args: HashMap::new(),
        }
    }
}

impl Default for ProcessProviderAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for ProcessProviderAdapter {
    async fn invoke(&self, provider: Provider, req: &DispatchRequest<'_>) -> anyhow::Result<ProviderResult> {
        let mut args = self.extra_args.get(&provider).cloned().unwrap_or_default();
        if let Some(mode) = req.agent_mode {
            args.push("--mode".to_string());
            args.push(mode.to_string());
        }
        if let Some(session) = req.session_id {
            args.push("--session".to_string());
            args.push(session.to_string());
        }

        let mut child = Command::new(provider.binary())
            .args(&args)
            .current_dir(req.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(req.prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(DISPATCH_DEADLINE, child.wait_with_output()).await;
        let output = match output {
            Ok(res) => res?,
            Err(_) => {
                return Ok(ProviderResult {
                    stdout: String::new(),
                    stderr: format!("{} timed out after {:?}", provider.name(), DISPATCH_DEADLINE),
                    exit_code: 124,
                    status: Some("FAILED".to_string()),
                    session_id: None,
                    usage: None,
                });
            }
        };

        Ok(ProviderResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            status: None,
            session_id: None,
            usage: None,
        })
    }
}

pub struct ProviderDispatcher {
    priority: Vec<Provider>,
    breaker: Arc<dyn CircuitBreakerStorePort>,
    breaker_ttl_seconds: u64,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderDispatcher {
    pub fn new(
        priority: Vec<Provider>,
        breaker: Arc<dyn CircuitBreakerStorePort>,
        breaker_ttl_seconds: u64,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        ProviderDispatcher {
            priority,
            breaker,
            breaker_ttl_seconds,
            adapter,
        }
    }

    /// Runs §4.3's algorithm: skip open breakers, invoke the first closed
    /// provider, trip and fall through on failure, return a synthetic
    /// failed result if every provider is exhausted.
    pub async fn execute(&self, req: &DispatchRequest<'_>) -> (ProviderResult, Option<Provider>) {
        for &provider in &self.priority {
            match self.breaker.is_open(provider.name()).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(_) => continue,
            }

            match self.adapter.invoke(provider, req).await {
                Ok(result) => {
                    if let Some(kind) = should_trip(&result) {
                        let _ = self
                            .breaker
                            .open(provider.name(), kind, self.breaker_ttl_seconds)
                            .await;
                        continue;
                    }
                    return (result, Some(provider));
                }
                Err(e) => {
                    if let Some(kind) = classify_error_kind(&e.to_string()) {
                        let _ = self
                            .breaker
                            .open(provider.name(), kind, self.breaker_ttl_seconds)
                            .await;
                    }
                    continue;
                }
            }
        }

        (ProviderResult::synthetic_failure(), None)
    }
}
