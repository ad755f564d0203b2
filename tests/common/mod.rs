#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use aeon::{DispatchError, DispatchRequest, Dispatcher, Reply};
use async_trait::async_trait;

/// Dispatcher that answers from a queue and records every request it sees.
#[derive(Default)]
pub struct ScriptedDispatcher {
    replies: Mutex<VecDeque<Result<Reply, DispatchError>>>,
    seen: Mutex<Vec<DispatchRequest>>,
}

impl ScriptedDispatcher {
    pub fn new(replies: Vec<Result<Reply, DispatchError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<Reply, DispatchError> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(DispatchError::Other("no scripted reply left".to_string())))
    }
}

pub fn text_reply(text: &str, suggestions: &[&str]) -> Result<Reply, DispatchError> {
    Ok(Reply {
        text: text.to_string(),
        suggestions: if suggestions.is_empty() {
            None
        } else {
            Some(suggestions.iter().map(|s| s.to_string()).collect())
        },
        ..Default::default()
    })
}
