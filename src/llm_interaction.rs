use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::attachment::Attachment;
use crate::constants;
use crate::dispatcher::{DispatchError, DispatchRequest, Dispatcher, Reply};
use crate::message::Source;
use crate::prompts;
use crate::routing::Route;
use crate::tools::{select_tools, ToolBox};

/// Tool-call rounds before the model is asked to answer without tools.
const MAX_TOOL_ROUNDS: usize = 4;

const FALLBACK_RESPONSE: &str =
    "My apologies, but I'm unable to provide a response to that right now. Please try rephrasing your request.";
const FALLBACK_SUGGESTIONS: [&str; 2] = ["Can you explain that differently?", "What are your capabilities?"];

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_base: String,
    pub api_key: String,
    pub chat_model: String,
    pub image_model: String,
    pub news_api_base: String,
    pub news_api_key: String,
    pub request_timeout: Duration,
}

impl ModelConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: constants::API_BASE.clone(),
            api_key: constants::API_KEY.clone(),
            chat_model: constants::CHAT_MODEL.clone(),
            image_model: constants::IMAGE_MODEL.clone(),
            news_api_base: constants::NEWS_API_BASE.clone(),
            news_api_key: constants::NEWS_API_KEY.clone(),
            request_timeout: Duration::from_secs(*constants::REQUEST_TIMEOUT_SECS),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.api_base.trim_end_matches('/'), model, method)
    }
}

// Structures matching the generateContent / predict endpoints. Parts stay as raw
// JSON so function calls can be echoed back verbatim.
#[derive(Deserialize, Debug, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

#[derive(Deserialize, Debug, Default)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize, Debug)]
struct Prediction {
    #[serde(rename = "bytesBase64Encoded")]
    bytes_base64: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

/// The JSON object the model is instructed to answer with.
#[derive(Deserialize, Debug)]
struct ModelOutput {
    #[serde(default)]
    response: String,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
    #[serde(default)]
    sources: Option<Vec<Source>>,
}

/// Dispatcher backed by the hosted generative model.
#[derive(Debug, Clone)]
pub struct ModelDispatcher {
    client: Client,
    config: ModelConfig,
    tools: ToolBox,
}

impl ModelDispatcher {
    pub fn new(config: ModelConfig) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let tools = ToolBox::new(client.clone(), config.news_api_base.clone(), config.news_api_key.clone());
        Ok(Self { client, config, tools })
    }

    #[instrument(skip(self, attachment), fields(has_attachment = attachment.is_some()))]
    pub async fn interpret_prompt(&self, prompt: &str, attachment: Option<&Attachment>) -> Result<Reply, DispatchError> {
        self.require_key()?;

        let tools = select_tools(prompt);
        let tool_names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        let instruction = prompts::system_instruction(
            &tool_names,
            attachment.map(|a| a.mime_type.as_str()),
            !prompt.trim().is_empty(),
        )
        .map_err(|e| DispatchError::Other(format!("failed to render system instruction: {e}")))?;

        let mut parts = Vec::new();
        if !prompt.trim().is_empty() {
            parts.push(json!({ "text": prompt }));
        }
        if let Some(att) = attachment {
            parts.push(json!({ "inlineData": { "mimeType": att.mime_type, "data": att.base64_data() } }));
        }
        let mut contents = vec![json!({ "role": "user", "parts": parts })];
        let declarations: Vec<Value> = tools.iter().map(|t| t.declaration()).collect();
        let url = self.config.model_url(&self.config.chat_model, "generateContent");
        let mut citations: Vec<Source> = Vec::new();

        for round in 0..=MAX_TOOL_ROUNDS {
            let mut body = json!({
                "systemInstruction": { "parts": [{ "text": instruction }] },
                "contents": contents,
            });
            // The final round has no tools so the model has to answer.
            if round < MAX_TOOL_ROUNDS {
                body["tools"] = json!([{ "functionDeclarations": declarations }]);
            }

            let response: GenerateContentResponse = self.post_json(&url, &body).await?;
            let parts = response
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts)
                .unwrap_or_default();

            let calls: Vec<(String, Value)> = parts
                .iter()
                .filter_map(|p| p.get("functionCall"))
                .map(|call| {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    (name, args)
                })
                .collect();

            if calls.is_empty() {
                let text: String = parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect();
                debug!(round, chars = text.len(), "Model answered");
                return Ok(parse_reply(&text, citations));
            }

            info!(round, calls = calls.len(), "Model requested tool calls");
            contents.push(json!({ "role": "model", "parts": parts }));
            let mut responses = Vec::with_capacity(calls.len());
            for (name, args) in calls {
                let output = self.tools.invoke(&name, &args).await;
                citations.extend(output.citations);
                responses.push(json!({ "functionResponse": { "name": name, "response": output.value } }));
            }
            contents.push(json!({ "role": "user", "parts": responses }));
        }

        warn!("Model kept calling tools; using fallback reply");
        Ok(fallback_reply())
    }

    #[instrument(skip(self))]
    pub async fn generate_image(&self, description: &str) -> Result<Reply, DispatchError> {
        self.require_key()?;
        let url = self.config.model_url(&self.config.image_model, "predict");
        let body = json!({
            "instances": [{ "prompt": description }],
            "parameters": { "sampleCount": 1 },
        });

        let response: PredictResponse = self.post_json(&url, &body).await?;
        let image_url = response
            .predictions
            .into_iter()
            .find_map(|p| {
                let bytes = p.bytes_base64.filter(|b| !b.is_empty())?;
                let mime = p.mime_type.unwrap_or_else(|| "image/png".to_string());
                Some(format!("data:{mime};base64,{bytes}"))
            })
            .ok_or(DispatchError::ImageGenerationFailed)?;

        Ok(Reply {
            image_url: Some(image_url),
            ..Default::default()
        })
    }

    fn require_key(&self) -> Result<(), DispatchError> {
        if self.config.api_key.is_empty() {
            error!("No API key configured for the hosted model");
            return Err(DispatchError::MissingCredentials);
        }
        Ok(())
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, DispatchError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Model API request failed");
            return Err(DispatchError::Upstream {
                status: status.as_u16(),
                body: error_body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DispatchError::Malformed(format!("failed to parse model API response: {e}")))
    }
}

#[async_trait]
impl Dispatcher for ModelDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<Reply, DispatchError> {
        match &request.route {
            Route::Conversation { prompt } => self.interpret_prompt(prompt, request.attachment.as_ref()).await,
            Route::Image { description } => self.generate_image(description).await,
        }
    }
}

fn fallback_reply() -> Reply {
    Reply {
        text: FALLBACK_RESPONSE.to_string(),
        suggestions: Some(FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
    inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
}

/// Turn the model's final text into a reply. Tool citations fill in for
/// missing `sources`.
fn parse_reply(text: &str, citations: Vec<Source>) -> Reply {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return fallback_reply();
    }

    let tool_sources = dedup_sources(citations);
    match serde_json::from_str::<ModelOutput>(body) {
        Ok(output) if output.response.trim().is_empty() => fallback_reply(),
        Ok(output) => Reply {
            text: output.response,
            image_url: None,
            suggestions: output.suggestions.filter(|s| !s.is_empty()),
            sources: output.sources.filter(|s| !s.is_empty()).or(tool_sources),
        },
        Err(_) => Reply {
            text: body.to_string(),
            sources: tool_sources,
            ..Default::default()
        },
    }
}

fn dedup_sources(citations: Vec<Source>) -> Option<Vec<Source>> {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<Source> = citations.into_iter().filter(|s| seen.insert(s.url.clone())).collect();
    (!unique.is_empty()).then_some(unique)
}
