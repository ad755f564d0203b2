use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attachment::Attachment;
use crate::message::Source;
use crate::routing::{route_prompt, Route, ValidationError};

/// What a turn asks of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub route: Route,
    pub attachment: Option<Attachment>,
}

impl DispatchRequest {
    pub fn new(prompt: &str, attachment: Option<Attachment>) -> Result<Self, ValidationError> {
        let route = route_prompt(prompt, attachment.is_some())?;
        Ok(Self { route, attachment })
    }
}

/// Structured success reply from the model layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("AI Error: no API key configured for the hosted model")]
    MissingCredentials,
    #[error("AI Error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AI Error: model API returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("AI Error: {0}")]
    Malformed(String),
    #[error("AI Error: Image generation failed.")]
    ImageGenerationFailed,
    #[error("AI Error: {0}")]
    Other(String),
}

/// The single asynchronous call that turns a prompt into a reply.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<Reply, DispatchError>;
}

/// Wire form of a dispatcher resolution: exactly one of `error` or
/// (`response` / `image_url`) is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn into_result(self) -> Result<Reply, String> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.response.is_none() && self.image_url.is_none() {
            return Err("Response contained neither text nor an image".to_string());
        }
        Ok(Reply {
            text: self.response.unwrap_or_default(),
            image_url: self.image_url,
            suggestions: self.suggestions,
            sources: self.sources,
        })
    }
}

impl From<Reply> for ActionResponse {
    fn from(reply: Reply) -> Self {
        // An image-only reply carries no response text on the wire
        let response = if reply.text.is_empty() && reply.image_url.is_some() {
            None
        } else {
            Some(reply.text)
        };
        Self {
            response,
            suggestions: reply.suggestions,
            sources: reply.sources,
            image_url: reply.image_url,
            error: None,
        }
    }
}

impl From<Result<Reply, DispatchError>> for ActionResponse {
    fn from(result: Result<Reply, DispatchError>) -> Self {
        match result {
            Ok(reply) => reply.into(),
            Err(e) => Self::error(e.to_string()),
        }
    }
}
