// Terminal chat: the same conversation controller as the web UI, driven from stdin.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::attachment::Attachment;
use crate::conversation::{Completion, SubmitError};
use crate::message::{Message, Sender};
use crate::session::ChatSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Say(String),
    New,
    Edit(usize),
    Suggest(usize),
    Attach(PathBuf),
    Detach,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> ChatCommand {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix('/') else {
        return ChatCommand::Say(line.to_string());
    };
    let (cmd, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim();
    match cmd {
        "new" => ChatCommand::New,
        "quit" | "exit" => ChatCommand::Quit,
        "detach" => ChatCommand::Detach,
        "attach" if !arg.is_empty() => ChatCommand::Attach(PathBuf::from(arg)),
        "edit" => arg.parse().map(ChatCommand::Edit).unwrap_or_else(|_| ChatCommand::Unknown(line.to_string())),
        "suggest" => arg
            .parse()
            .map(ChatCommand::Suggest)
            .unwrap_or_else(|_| ChatCommand::Unknown(line.to_string())),
        _ => ChatCommand::Unknown(line.to_string()),
    }
}

pub fn format_message(position: usize, message: &Message) -> String {
    let who = match message.sender {
        Sender::User => "You",
        Sender::Assistant => "AeonAI",
    };
    let mut out = format!("[{}] {}: {}", position, who, message.text);
    if let Some(url) = &message.image_url {
        let shown = if url.chars().count() > 48 {
            format!("{}...", url.chars().take(48).collect::<String>())
        } else {
            url.clone()
        };
        out.push_str(&format!("\n    image: {shown}"));
    }
    for source in message.sources.iter().flatten() {
        out.push_str(&format!("\n    source: {} <{}>", source.title, source.url));
    }
    for (i, suggestion) in message.suggestions.iter().flatten().enumerate() {
        out.push_str(&format!("\n    /suggest {} -> {}", i + 1, suggestion));
    }
    out
}

/// Run the chat loop until `/quit` or end of input.
pub async fn run_chat<R, W>(session: &mut ChatSession, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    info!("Starting terminal chat");
    writeln!(out, "AeonAI chat. /new, /edit <n>, /suggest <n>, /attach <path>, /detach, /quit")?;
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let outcome = match parse_command(&line) {
            ChatCommand::Quit => break,
            ChatCommand::Say(text) => {
                session.conversation_mut().set_draft(text);
                session.submit_draft().await
            }
            ChatCommand::Suggest(n) => {
                let chosen = session
                    .conversation()
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .and_then(|m| m.suggestions.as_ref())
                    .and_then(|s| s.get(n.wrapping_sub(1)))
                    .cloned();
                match chosen {
                    Some(text) => {
                        writeln!(out, "> {text}")?;
                        session.click_suggestion(&text).await
                    }
                    None => {
                        writeln!(out, "No suggestion {n}.")?;
                        continue;
                    }
                }
            }
            ChatCommand::Edit(n) => {
                let id = session.conversation().messages().get(n.wrapping_sub(1)).map(|m| m.id);
                match id.map(|id| session.conversation_mut().edit_message(id)) {
                    Some(Ok(())) => {
                        let conv = session.conversation();
                        let attached = if conv.staging().is_some() { " (attachment kept)" } else { "" };
                        writeln!(out, "Editing [{n}]{attached}. Was: {}", conv.draft_text())?;
                        writeln!(out, "Type the replacement text.")?;
                    }
                    Some(Err(e)) => writeln!(out, "Cannot edit [{n}]: {e}")?,
                    None => writeln!(out, "No message [{n}].")?,
                }
                continue;
            }
            ChatCommand::Attach(path) => {
                match Attachment::from_path(&path) {
                    Ok(att) => {
                        writeln!(out, "Attached {} ({}).", att.filename, att.mime_type)?;
                        session.conversation_mut().stage_attachment(att);
                    }
                    Err(e) => writeln!(out, "{e}")?,
                }
                continue;
            }
            ChatCommand::Detach => {
                session.conversation_mut().clear_attachment();
                writeln!(out, "Attachment removed.")?;
                continue;
            }
            ChatCommand::New => {
                session.conversation_mut().new_chat();
                writeln!(out, "Started a new chat.")?;
                continue;
            }
            ChatCommand::Unknown(cmd) => {
                writeln!(out, "Unknown command: {cmd}")?;
                continue;
            }
        };

        match outcome {
            Ok(Completion::Answered { .. }) => render_transcript(session, out)?,
            Ok(Completion::Failed { error, .. }) => writeln!(out, "Error: {error}")?,
            Ok(Completion::Discarded) => debug!("Reply discarded"),
            Err(SubmitError::Invalid(e)) => writeln!(out, "{e}")?,
            Err(e) => writeln!(out, "Not sent: {e}")?,
        }
    }

    info!("Terminal chat finished");
    Ok(())
}

fn render_transcript<W: Write>(session: &ChatSession, out: &mut W) -> Result<()> {
    writeln!(out)?;
    for (i, message) in session.conversation().messages().iter().enumerate() {
        writeln!(out, "{}", format_message(i + 1, message))?;
    }
    writeln!(out)?;
    Ok(())
}
