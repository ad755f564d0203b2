//! The conversation controller: owns the transcript, the single in-flight turn,
//! the edit cursor, the draft text and the attachment slot.
//!
//! The controller never awaits anything itself. `submit` mutates the transcript
//! optimistically and hands back a [`Turn`] for the caller to dispatch; the
//! caller feeds the outcome back through [`Conversation::complete`]. Each turn is
//! tagged with the generation it was started in, and `new_chat` bumps the
//! generation so late replies for a discarded transcript are dropped.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::attachment::{Attachment, AttachmentStaging, StagingView};
use crate::dispatcher::{DispatchError, DispatchRequest, Reply};
use crate::message::{IdAllocator, Message, MessageId, Sender};
use crate::routing::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnTicket {
    pub turn: u64,
    pub generation: u64,
}

/// A submitted turn waiting to be dispatched.
#[derive(Debug, Clone)]
pub struct Turn {
    pub ticket: TurnTicket,
    pub request: DispatchRequest,
}

#[derive(Debug)]
struct PendingTurn {
    ticket: TurnTicket,
    edited_id: Option<MessageId>,
    appended_id: Option<MessageId>,
    // Suggestions taken off earlier replies, put back on rollback.
    stripped_suggestions: Vec<(MessageId, Vec<String>)>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("a reply is still pending")]
    Busy,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("message {0} being edited no longer exists")]
    EditTargetMissing(MessageId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("a reply is still pending")]
    Busy,
    #[error("no user message with id {0}")]
    NotAUserMessage(MessageId),
}

/// How a dispatcher resolution was reconciled into the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A new assistant message was placed in the transcript.
    Answered { id: MessageId },
    /// The dispatch failed; `rolled_back` is true when the optimistic user
    /// message was removed again.
    Failed { error: String, rolled_back: bool },
    /// The reply belonged to an abandoned conversation or an unknown turn.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub messages: Vec<Message>,
    pub pending: bool,
    pub draft_text: String,
    pub editing_id: Option<MessageId>,
    pub staging: Option<StagingView>,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    pending: Option<PendingTurn>,
    editing_id: Option<MessageId>,
    draft_text: String,
    staging: Option<AttachmentStaging>,
    generation: u64,
    next_turn: u64,
    ids: IdAllocator,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn editing_id(&self) -> Option<MessageId> {
        self.editing_id
    }

    pub fn draft_text(&self) -> &str {
        &self.draft_text
    }

    pub fn staging(&self) -> Option<&AttachmentStaging> {
        self.staging.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> ConversationView {
        ConversationView {
            messages: self.messages.clone(),
            pending: self.is_pending(),
            draft_text: self.draft_text.clone(),
            editing_id: self.editing_id,
            staging: self.staging.as_ref().map(AttachmentStaging::view),
        }
    }

    /// Typing, or a speech-to-text result landing in the input box.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft_text = text.into();
    }

    pub fn stage_attachment(&mut self, attachment: Attachment) {
        debug!(filename = %attachment.filename, mime = %attachment.mime_type, "Staging attachment");
        self.staging = Some(AttachmentStaging::new(attachment));
    }

    pub fn clear_attachment(&mut self) {
        self.staging = None;
    }

    /// Submit whatever is in the draft box and the attachment slot.
    pub fn submit_draft(&mut self) -> Result<Turn, SubmitError> {
        let prompt = self.draft_text.clone();
        let attachment = self.staging.as_ref().map(|s| s.attachment.clone());
        self.submit(&prompt, attachment)
    }

    pub fn submit(&mut self, prompt: &str, attachment: Option<Attachment>) -> Result<Turn, SubmitError> {
        if self.is_pending() {
            debug!("Ignoring submit while a reply is pending");
            return Err(SubmitError::Busy);
        }
        let request = DispatchRequest::new(prompt, attachment)?;
        let preview = request.attachment.as_ref().map(Attachment::to_data_uri);

        let pending = match self.editing_id {
            Some(edit_id) => {
                let Some(idx) = self.messages.iter().position(|m| m.id == edit_id) else {
                    debug_assert!(false, "editing id {edit_id} points at no message");
                    warn!(edit_id, "Edit target vanished; dropping edit state");
                    self.editing_id = None;
                    return Err(SubmitError::EditTargetMissing(edit_id));
                };
                let edited = &mut self.messages[idx];
                edited.text = prompt.to_string();
                if preview.is_some() {
                    edited.image_url = preview;
                }
                // The old reply answered the pre-edit text.
                if self.messages.get(idx + 1).is_some_and(Message::is_assistant) {
                    let stale = self.messages.remove(idx + 1);
                    debug!(stale_id = stale.id, "Removed stale reply to edited message");
                }
                self.editing_id = None;
                PendingTurn {
                    ticket: self.next_ticket(),
                    edited_id: Some(edit_id),
                    appended_id: None,
                    stripped_suggestions: Vec::new(),
                }
            }
            None => {
                let stripped_suggestions = self
                    .messages
                    .iter_mut()
                    .filter(|m| m.is_assistant())
                    .filter_map(|m| m.suggestions.take().map(|s| (m.id, s)))
                    .collect();
                let id = self.ids.next_id();
                self.messages.push(Message::user(id, prompt.to_string(), preview));
                PendingTurn {
                    ticket: self.next_ticket(),
                    edited_id: None,
                    appended_id: Some(id),
                    stripped_suggestions,
                }
            }
        };

        self.draft_text.clear();
        self.staging = None;
        let ticket = pending.ticket;
        debug!(turn = ticket.turn, generation = ticket.generation, edit = pending.edited_id.is_some(), "Turn submitted");
        self.pending = Some(pending);
        Ok(Turn { ticket, request })
    }

    /// A follow-up chip click: an immediate submission of the suggestion text.
    pub fn click_suggestion(&mut self, text: &str) -> Result<Turn, SubmitError> {
        self.submit(text, None)
    }

    pub fn edit_message(&mut self, id: MessageId) -> Result<(), EditError> {
        if self.is_pending() {
            return Err(EditError::Busy);
        }
        let message = self
            .messages
            .iter()
            .find(|m| m.id == id && m.is_user())
            .ok_or(EditError::NotAUserMessage(id))?;

        let staging = match message.image_url.as_deref() {
            Some(url) => match Attachment::from_data_uri("attachment", url) {
                Ok(att) => Some(AttachmentStaging::new(att)),
                Err(e) => {
                    warn!(id, error = %e, "Could not restore image of edited message");
                    None
                }
            },
            None => None,
        };
        self.draft_text = message.text.clone();
        self.staging = staging;
        self.editing_id = Some(id);
        Ok(())
    }

    /// Start over. An in-flight turn keeps `pending` set until it resolves, but
    /// its reply is discarded.
    pub fn new_chat(&mut self) {
        self.messages.clear();
        self.staging = None;
        self.draft_text.clear();
        self.editing_id = None;
        self.generation += 1;
        info!(generation = self.generation, in_flight = self.is_pending(), "New chat");
    }

    /// Reconcile a dispatcher resolution for `ticket`.
    pub fn complete(&mut self, ticket: TurnTicket, result: Result<Reply, DispatchError>) -> Completion {
        let Some(pending) = self.pending.take_if(|p| p.ticket == ticket) else {
            warn!(turn = ticket.turn, "Reply for a turn that is not pending; ignoring");
            return Completion::Discarded;
        };
        if ticket.generation != self.generation {
            info!(
                turn = ticket.turn,
                generation = ticket.generation,
                current = self.generation,
                "Discarding reply for an abandoned conversation"
            );
            return Completion::Discarded;
        }

        match result {
            Ok(reply) => self.apply_reply(pending, reply),
            Err(e) => self.roll_back(pending, e.to_string()),
        }
    }

    fn apply_reply(&mut self, pending: PendingTurn, reply: Reply) -> Completion {
        let id = self.ids.next_id();
        let answer = Message {
            id,
            sender: Sender::Assistant,
            text: reply.text,
            image_url: reply.image_url,
            suggestions: reply.suggestions,
            sources: reply.sources,
        };

        match pending.edited_id {
            Some(edit_id) => {
                let Some(idx) = self.messages.iter().position(|m| m.id == edit_id) else {
                    debug_assert!(false, "edited message {edit_id} vanished while pending");
                    warn!(edit_id, "Edited message vanished; dropping reply");
                    return Completion::Discarded;
                };
                let at = idx + 1;
                if self.messages.get(at).is_some_and(Message::is_assistant) {
                    self.messages[at] = answer;
                } else {
                    self.messages.insert(at, answer);
                }
            }
            None => self.messages.push(answer),
        }
        debug!(id, "Reply applied");
        Completion::Answered { id }
    }

    fn roll_back(&mut self, pending: PendingTurn, error: String) -> Completion {
        warn!(%error, edit = pending.edited_id.is_some(), "Dispatch failed");
        let Some(appended) = pending.appended_id else {
            // Edits keep the text as typed.
            return Completion::Failed { error, rolled_back: false };
        };
        self.messages.retain(|m| m.id != appended);
        for (id, suggestions) in pending.stripped_suggestions {
            if let Some(m) = self.messages.iter_mut().find(|m| m.id == id) {
                m.suggestions = Some(suggestions);
            }
        }
        info!(removed = appended, "Rolled back optimistic user message");
        Completion::Failed { error, rolled_back: true }
    }

    fn next_ticket(&mut self) -> TurnTicket {
        self.next_turn += 1;
        TurnTicket {
            turn: self.next_turn,
            generation: self.generation,
        }
    }
}
