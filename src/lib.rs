pub mod attachment;
pub mod chat;
pub mod constants;
pub mod conversation;
pub mod dispatcher;
pub mod llm_interaction;
pub mod message;
pub mod prompts;
pub mod routing;
pub mod session;
pub mod tools;
pub mod web_server;

pub use conversation::{Completion, Conversation, SubmitError, Turn, TurnTicket};
pub use dispatcher::{ActionResponse, DispatchError, DispatchRequest, Dispatcher, Reply};
pub use message::{Message, MessageId, Sender, Source};
