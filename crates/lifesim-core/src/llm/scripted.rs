//! Test double that replays queued replies and records every request.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use super::{GenerationClient, GenerationError, GenerationRequest};

#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        client
            .replies
            .lock()
            .extend(replies.into_iter().map(|r| Ok(r.into())));
        Arc::new(client)
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: GenerationError) {
        self.replies.lock().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Parse("script exhausted".into())))
    }
}
