//! Decides whether a prompt is a conversational request or an image-generation
//! request, and rejects prompts that cannot be sent at all.

use serde::Serialize;
use thiserror::Error;

const IMAGE_PREFIXES: &[&str] = &["generate image", "create an image", "create image"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a prompt.")]
    EmptyPrompt,
    #[error("Please provide a description for the image.")]
    MissingImageDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Route {
    Conversation { prompt: String },
    Image { description: String },
}

/// Route a prompt. `has_attachment` allows an empty prompt through on the
/// conversation path (the model is asked to describe the attachment).
pub fn route_prompt(prompt: &str, has_attachment: bool) -> Result<Route, ValidationError> {
    let trimmed = prompt.trim();
    if let Some(rest) = strip_image_prefix(trimmed) {
        let description = strip_connective(rest);
        if description.is_empty() {
            return Err(ValidationError::MissingImageDescription);
        }
        return Ok(Route::Image {
            description: description.to_string(),
        });
    }
    if trimmed.is_empty() && !has_attachment {
        return Err(ValidationError::EmptyPrompt);
    }
    Ok(Route::Conversation {
        prompt: prompt.to_string(),
    })
}

fn strip_image_prefix(prompt: &str) -> Option<&str> {
    IMAGE_PREFIXES.iter().find_map(|prefix| {
        let head = prompt.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        let rest = &prompt[prefix.len()..];
        // "generate images ..." is not the command
        match rest.chars().next() {
            None => Some(rest),
            Some(c) if c.is_whitespace() || c == ':' || c == ',' => Some(rest),
            Some(_) => None,
        }
    })
}

fn strip_connective(rest: &str) -> &str {
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == ',');
    let rest = match rest.get(..3) {
        Some(head) if head.eq_ignore_ascii_case("of ") => &rest[3..],
        _ if rest.eq_ignore_ascii_case("of") => "",
        _ => rest,
    };
    rest.trim()
}
