//! Driver that replays canned responses.
//!
//! Useful for exercising the orchestrator without network access. Each
//! call to [`LlmDriver::complete`] pops the next scripted response and
//! records what it was asked.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::mcp::types::Tool;
use crate::session::{Conversation, Message};

use super::{ContentBlock, LlmDriver, LlmError};

/// What the driver saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    /// Tool names offered.
    pub tools: Vec<String>,
    /// Conversation at the time of the call.
    pub history: Vec<Message>,
}

/// Replays a fixed sequence of responses, then fails.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    responses: Mutex<VecDeque<Result<Vec<ContentBlock>, LlmError>>>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    #[must_use]
    pub fn then(self, blocks: Vec<ContentBlock>) -> Self {
        if let Ok(mut r) = self.responses.lock() {
            r.push_back(Ok(blocks));
        }
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn then_fail(self, error: LlmError) -> Self {
        if let Ok(mut r) = self.responses.lock() {
            r.push_back(Err(error));
        }
        self
    }

    /// Every query received so far.
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().map(|q| q.len()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedDriver {
    async fn complete(
        &self,
        tools: &[Tool],
        history: &Conversation,
    ) -> Result<Vec<ContentBlock>, LlmError> {
        if let Ok(mut q) = self.queries.lock() {
            q.push(RecordedQuery {
                tools: tools.iter().map(|t| t.name.clone()).collect(),
                history: history.messages().to_vec(),
            });
        }

        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(LlmError::Decode("script exhausted".into())))
    }
}
