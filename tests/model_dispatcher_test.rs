use std::time::Duration;

use aeon::attachment::Attachment;
use aeon::llm_interaction::{ModelConfig, ModelDispatcher};
use aeon::{DispatchError, DispatchRequest, Dispatcher};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/gemini-test:generateContent";
const PREDICT_PATH: &str = "/v1beta/models/imagen-test:predict";

fn config(server: &MockServer, api_key: &str) -> ModelConfig {
    ModelConfig {
        api_base: server.uri(),
        api_key: api_key.to_string(),
        chat_model: "gemini-test".to_string(),
        image_model: "imagen-test".to_string(),
        news_api_base: server.uri(),
        news_api_key: "news-key".to_string(),
        request_timeout: Duration::from_secs(5),
    }
}

fn model_text(text: &str) -> Value {
    json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    })
}

async fn request_bodies(server: &MockServer, wanted_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == wanted_path)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_conversation_reply_is_parsed() {
    let server = MockServer::start().await;
    let answer = json!({
        "response": "Rust is a systems language.",
        "suggestions": ["What is borrowing?", "Show me an example"],
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_text(&answer)))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let request = DispatchRequest::new("what is rust?", None).unwrap();
    let reply = dispatcher.dispatch(&request).await.unwrap();

    assert_eq!(reply.text, "Rust is a systems language.");
    assert_eq!(
        reply.suggestions,
        Some(vec!["What is borrowing?".to_string(), "Show me an example".to_string()])
    );
    assert_eq!(reply.image_url, None);

    let bodies = request_bodies(&server, GENERATE_PATH).await;
    assert_eq!(bodies[0]["contents"][0]["parts"][0]["text"], "what is rust?");
    assert!(bodies[0]["systemInstruction"]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .contains("AeonAI"));
    assert!(bodies[0]["tools"].is_array());
}

#[tokio::test]
async fn test_attachment_is_sent_inline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_text(r#"{"response":"A cat."}"#)))
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let attachment = Attachment::new("cat.png", "image/png", vec![1, 2, 3]).unwrap();
    let request = DispatchRequest::new("", Some(attachment)).unwrap();
    let reply = dispatcher.dispatch(&request).await.unwrap();
    assert_eq!(reply.text, "A cat.");

    let bodies = request_bodies(&server, GENERATE_PATH).await;
    let parts = bodies[0]["contents"][0]["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
    assert_eq!(parts[0]["inlineData"]["data"], "AQID");
}

#[test_log::test(tokio::test)]
async fn test_tool_call_round_trip_collects_citations() {
    let server = MockServer::start().await;
    let function_call = json!({
        "candidates": [{ "content": { "role": "model", "parts": [
            { "functionCall": { "name": "getLatestNews", "args": { "query": "rust" } } }
        ] } }]
    });
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(function_call))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(model_text(r#"{"response":"Rust 2.0 shipped."}"#)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/1/news"))
        .and(query_param("apikey", "news-key"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "results": [
                { "title": "Rust 2.0", "link": "https://news.example/rust-2", "description": "It shipped." },
                { "title": "Rust 2.0", "link": "https://news.example/rust-2", "description": "Duplicate." },
                { "title": "No link" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let reply = dispatcher
        .dispatch(&DispatchRequest::new("latest rust news", None).unwrap())
        .await
        .unwrap();

    assert_eq!(reply.text, "Rust 2.0 shipped.");
    let sources = reply.sources.expect("tool citations become sources");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].url, "https://news.example/rust-2");

    let bodies = request_bodies(&server, GENERATE_PATH).await;
    assert_eq!(bodies.len(), 2);
    let contents = bodies[1]["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "getLatestNews");
}

#[tokio::test]
async fn test_endless_tool_calls_fall_back() {
    let server = MockServer::start().await;
    let function_call = json!({
        "candidates": [{ "content": { "parts": [
            { "functionCall": { "name": "getStockPrice", "args": { "ticker": "GOOG" } } }
        ] } }]
    });
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(function_call))
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let reply = dispatcher
        .dispatch(&DispatchRequest::new("price of GOOG stock", None).unwrap())
        .await
        .unwrap();

    assert!(reply.text.starts_with("My apologies"));
    assert_eq!(reply.suggestions.map(|s| s.len()), Some(2));

    let bodies = request_bodies(&server, GENERATE_PATH).await;
    assert!(bodies.last().unwrap().get("tools").is_none());
}

#[tokio::test]
async fn test_image_prompt_returns_data_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PREDICT_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [{ "bytesBase64Encoded": "iVBORw0K", "mimeType": "image/png" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let reply = dispatcher
        .dispatch(&DispatchRequest::new("generate image of a red fox", None).unwrap())
        .await
        .unwrap();

    assert_eq!(reply.image_url.as_deref(), Some("data:image/png;base64,iVBORw0K"));
    assert!(reply.text.is_empty());

    let bodies = request_bodies(&server, PREDICT_PATH).await;
    assert_eq!(bodies[0]["instances"][0]["prompt"], "a red fox");
}

#[tokio::test]
async fn test_image_without_bytes_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(PREDICT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "predictions": [] })))
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let err = dispatcher.generate_image("a fox").await.unwrap_err();
    assert!(matches!(err, DispatchError::ImageGenerationFailed));
    assert_eq!(err.to_string(), "AI Error: Image generation failed.");
}

#[tokio::test]
async fn test_missing_key_short_circuits() {
    let server = MockServer::start().await;
    let dispatcher = ModelDispatcher::new(config(&server, "")).unwrap();

    let err = dispatcher
        .dispatch(&DispatchRequest::new("hello", None).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingCredentials));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_upstream_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let err = dispatcher
        .dispatch(&DispatchRequest::new("hello", None).unwrap())
        .await
        .unwrap_err();
    match &err {
        DispatchError::Upstream { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "quota exceeded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().starts_with("AI Error:"));
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let dispatcher = ModelDispatcher::new(config(&server, "test-key")).unwrap();
    let err = dispatcher.interpret_prompt("hello", None).await.unwrap_err();
    assert!(matches!(err, DispatchError::Malformed(_)));
}
