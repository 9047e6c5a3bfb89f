//! Agent service seam.
//!
//! The feed worker creates agent memories through this trait. The
//! default deployment writes straight to the memory table (the agent
//! reads from it); `HttpAgentClient` targets a remote agent service
//! instead. Both are idempotent under the memory uniqueness key —
//! the constraint, not the caller, guarantees at-most-once.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use patchwork_store::{MemoryInsert, MemoryStore, NewMemory};

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Worth re-queueing: network failures and agent-side 5xx.
    #[error("agent service transient failure: {0}")]
    Transient(String),

    /// Not worth retrying: the request itself is unacceptable.
    #[error("agent service rejected memory: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Uuid),
    /// A memory with the same identity already exists.
    AlreadyExists,
}

#[async_trait]
pub trait AgentService: Send + Sync {
    async fn create_memory(&self, memory: NewMemory) -> Result<CreateOutcome, AgentError>;
}

// ---------------------------------------------------------------------------
// LocalAgentService — default deployment, writes the memory table
// ---------------------------------------------------------------------------

pub struct LocalAgentService {
    memories: MemoryStore,
}

impl LocalAgentService {
    pub fn new(memories: MemoryStore) -> Self {
        Self { memories }
    }
}

#[async_trait]
impl AgentService for LocalAgentService {
    async fn create_memory(&self, memory: NewMemory) -> Result<CreateOutcome, AgentError> {
        match self.memories.insert(memory).await {
            Ok(MemoryInsert::Created(id)) => Ok(CreateOutcome::Created(id)),
            Ok(MemoryInsert::AlreadyExists) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(AgentError::Transient(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpAgentClient — remote agent service
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateMemoryResponse {
    memory_id: Uuid,
}

pub struct HttpAgentClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAgentClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AgentService for HttpAgentClient {
    async fn create_memory(&self, memory: NewMemory) -> Result<CreateOutcome, AgentError> {
        let url = format!("{}/memories", self.endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "agent_id": memory.agent_id,
            "patch_id": memory.patch_id,
            "discovered_content_id": memory.discovered_content_id,
            "content_hash": memory.content_hash,
            "source_type": memory.source_type,
            "source_url": memory.source_url,
            "source_title": memory.source_title,
            "content": memory.content,
            "tags": memory.tags,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 409 {
            debug!("Agent reported memory already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        if status.is_server_error() {
            return Err(AgentError::Transient(format!("agent error {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Permanent(format!("agent error {status}: {text}")));
        }

        let parsed: CreateMemoryResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;
        Ok(CreateOutcome::Created(parsed.memory_id))
    }
}

// ---------------------------------------------------------------------------
// MockAgentService (for tests)
// ---------------------------------------------------------------------------

/// Scriptable agent: queued errors are returned first, then every call
/// succeeds. Records the memories it accepted.
pub struct MockAgentService {
    failures: Mutex<VecDeque<AgentError>>,
    accepted: Mutex<Vec<NewMemory>>,
}

impl MockAgentService {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            accepted: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next call with a transient error.
    pub fn fail_next_transient(&self, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back(AgentError::Transient(message.to_string()));
    }

    pub fn accepted(&self) -> Vec<NewMemory> {
        self.accepted.lock().unwrap().clone()
    }
}

impl Default for MockAgentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentService for MockAgentService {
    async fn create_memory(&self, memory: NewMemory) -> Result<CreateOutcome, AgentError> {
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.accepted.lock().unwrap().push(memory);
        Ok(CreateOutcome::Created(Uuid::new_v4()))
    }
}
