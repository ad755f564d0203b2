use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json},
    routing::{get, post},
    serve, Router,
};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::attachment::Attachment;
use crate::conversation::{Completion, Conversation, ConversationView, SubmitError, Turn, TurnTicket};
use crate::dispatcher::{ActionResponse, DispatchError, DispatchRequest, Dispatcher, Reply};
use crate::message::MessageId;

/// Intents the browser sends over the conversation socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientIntent {
    UpdateDraft {
        text: String,
    },
    Submit {
        #[serde(default)]
        prompt: Option<String>,
    },
    EditMessage {
        id: MessageId,
    },
    ClickSuggestion {
        text: String,
    },
    NewChat,
    StageAttachment {
        filename: String,
        #[serde(rename = "dataUri")]
        data_uri: String,
    },
    ClearAttachment,
}

/// Events pushed to the browser.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    State(ConversationView),
    Toast { title: String, description: String },
    Notice { message: String },
}

pub type DispatchOutcome = (TurnTicket, Result<Reply, DispatchError>);

/// One browser connection's conversation. Dispatches run on spawned tasks and
/// report back through `completions`; only the socket loop touches the
/// controller.
pub struct ConversationDriver {
    conversation: Conversation,
    dispatcher: Arc<dyn Dispatcher>,
    completions: mpsc::UnboundedSender<DispatchOutcome>,
}

impl ConversationDriver {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, completions: mpsc::UnboundedSender<DispatchOutcome>) -> Self {
        Self {
            conversation: Conversation::new(),
            dispatcher,
            completions,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> ServerEvent {
        ServerEvent::State(self.conversation.snapshot())
    }

    pub fn handle_intent(&mut self, intent: ClientIntent) -> Vec<ServerEvent> {
        debug!(?intent, "Client intent");
        let mut events = Vec::new();
        match intent {
            ClientIntent::UpdateDraft { text } => self.conversation.set_draft(text),
            ClientIntent::Submit { prompt } => {
                if let Some(prompt) = prompt {
                    self.conversation.set_draft(prompt);
                }
                let submitted = self.conversation.submit_draft();
                self.start_turn(submitted, &mut events);
            }
            ClientIntent::ClickSuggestion { text } => {
                let submitted = self.conversation.click_suggestion(&text);
                self.start_turn(submitted, &mut events);
            }
            ClientIntent::EditMessage { id } => {
                if let Err(e) = self.conversation.edit_message(id) {
                    debug!(id, error = %e, "Edit ignored");
                }
            }
            ClientIntent::NewChat => self.conversation.new_chat(),
            ClientIntent::StageAttachment { filename, data_uri } => {
                match Attachment::from_data_uri(filename, &data_uri) {
                    Ok(att) => self.conversation.stage_attachment(att),
                    Err(e) => events.push(ServerEvent::Toast {
                        title: "Attachment rejected".to_string(),
                        description: e.to_string(),
                    }),
                }
            }
            ClientIntent::ClearAttachment => self.conversation.clear_attachment(),
        }
        events.push(self.state());
        events
    }

    pub fn handle_completion(&mut self, ticket: TurnTicket, result: Result<Reply, DispatchError>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        if let Completion::Failed { error, .. } = self.conversation.complete(ticket, result) {
            events.push(ServerEvent::Toast {
                title: "Error".to_string(),
                description: error,
            });
        }
        events.push(self.state());
        events
    }

    fn start_turn(&mut self, submitted: Result<Turn, SubmitError>, events: &mut Vec<ServerEvent>) {
        let turn = match submitted {
            Ok(turn) => turn,
            Err(SubmitError::Invalid(e)) => {
                events.push(ServerEvent::Notice { message: e.to_string() });
                return;
            }
            Err(e) => {
                debug!(error = %e, "Submission ignored");
                return;
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&turn.request).await;
            if completions.send((turn.ticket, result)).is_err() {
                debug!(turn = turn.ticket.turn, "Connection closed before reply arrived");
            }
        });
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// The request/response action: one prompt in, one `ActionResponse` out.
pub async fn respond(dispatcher: &dyn Dispatcher, request: ActionRequest) -> ActionResponse {
    let attachment = match request.attachment.as_deref().filter(|s| !s.is_empty()) {
        Some(uri) => match Attachment::from_data_uri("attachment", uri) {
            Ok(att) => Some(att),
            Err(e) => return ActionResponse::error(e.to_string()),
        },
        None => None,
    };
    let dispatch_request = match DispatchRequest::new(&request.prompt, attachment) {
        Ok(r) => r,
        Err(e) => return ActionResponse::error(e.to_string()),
    };
    let result = dispatcher.dispatch(&dispatch_request).await;
    if let Err(e) = &result {
        error!(error = %e, "Action dispatch failed");
    }
    result.into()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    pub fn new(templates_dir: PathBuf, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir)),
            dispatcher,
        }
    }
}

fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<axum::response::Html<String>, axum::response::Html<String>> {
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                let context = minijinja::context! {
                    title => "AeonAI",
                };
                tmpl.render(context)
            })
        })
        .map(axum::response::Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            axum::response::Html(format!("Internal Server Error: {}", e))
        })
}

async fn respond_handler(State(state): State<AppState>, Json(request): Json<ActionRequest>) -> Json<ActionResponse> {
    Json(respond(state.dispatcher.as_ref(), request).await)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_events(socket: &mut WebSocket, events: Vec<ServerEvent>) -> bool {
    for event in events {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server event: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(json)).await.is_err() {
            warn!("WebSocket client disconnected or send error. Closing connection.");
            return false;
        }
    }
    true
}

// Each connection owns its own conversation; it is dropped with the socket.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let (completions_tx, mut completions_rx) = mpsc::unbounded_channel();
    let mut driver = ConversationDriver::new(state.dispatcher, completions_tx);

    if !send_events(&mut socket, vec![driver.state()]).await {
        return;
    }

    loop {
        let events = tokio::select! {
            Some((ticket, result)) = completions_rx.recv() => driver.handle_completion(ticket, result),
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientIntent>(&text) {
                    Ok(intent) => driver.handle_intent(intent),
                    Err(e) => {
                        warn!("Unrecognised client message: {}", e);
                        vec![ServerEvent::Notice { message: format!("Unrecognised message: {e}") }]
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    warn!("Received unexpected binary message from client");
                    continue;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    info!("Client requested WebSocket close");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("WebSocket client disconnected");
                    break;
                }
            },
        };
        if !send_events(&mut socket, events).await {
            break;
        }
    }
    info!("WebSocket connection closed");
}

pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(|_| async {
        Ok::<_, std::convert::Infallible>((hyper::StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/respond", post(respond_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(config: ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
    let state = AppState::new(config.templates_dir.clone(), dispatcher);
    let app = router(state, config.static_dir.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
