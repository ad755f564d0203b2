use std::sync::Arc;

use tracing::instrument;

use crate::attachment::Attachment;
use crate::conversation::{Completion, Conversation, SubmitError, Turn};
use crate::dispatcher::Dispatcher;

/// A conversation bound to a dispatcher, awaiting each turn in place.
///
/// Suits callers that handle one intent at a time (the terminal chat, tests).
/// The web socket drives [`Conversation`] directly so it can keep serving
/// intents while a reply is in flight.
pub struct ChatSession {
    conversation: Conversation,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ChatSession {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            conversation: Conversation::new(),
            dispatcher,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub async fn submit(&mut self, prompt: &str, attachment: Option<Attachment>) -> Result<Completion, SubmitError> {
        let turn = self.conversation.submit(prompt, attachment)?;
        Ok(self.run(turn).await)
    }

    pub async fn submit_draft(&mut self) -> Result<Completion, SubmitError> {
        let turn = self.conversation.submit_draft()?;
        Ok(self.run(turn).await)
    }

    pub async fn click_suggestion(&mut self, text: &str) -> Result<Completion, SubmitError> {
        let turn = self.conversation.click_suggestion(text)?;
        Ok(self.run(turn).await)
    }

    #[instrument(skip(self, turn), fields(turn = turn.ticket.turn))]
    async fn run(&mut self, turn: Turn) -> Completion {
        let result = self.dispatcher.dispatch(&turn.request).await;
        self.conversation.complete(turn.ticket, result)
    }
}
