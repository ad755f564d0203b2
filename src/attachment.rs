//! Attachment handling: the single-slot staging buffer and the `data:` URI
//! encoding used whenever a file crosses into the dispatcher.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use thiserror::Error;

pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

const ACCEPTED_DOCUMENT_TYPES: &[&str] = &["application/pdf", "text/plain", "text/markdown"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("File is too large ({size} bytes, limit is {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("File is empty")]
    Empty,
    #[error("Malformed data URI: {0}")]
    MalformedDataUri(String),
    #[error("Could not read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// A file chosen by the user, held by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Result<Self, AttachmentError> {
        let mime_type = mime_type.into().trim().to_ascii_lowercase();
        if !is_accepted_type(&mime_type) {
            return Err(AttachmentError::UnsupportedType(mime_type));
        }
        if data.is_empty() {
            return Err(AttachmentError::Empty);
        }
        if data.len() > MAX_ATTACHMENT_BYTES {
            return Err(AttachmentError::TooLarge {
                size: data.len(),
                max: MAX_ATTACHMENT_BYTES,
            });
        }
        Ok(Self {
            filename: filename.into(),
            mime_type,
            data,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let mime_type = mime_for_extension(&ext).ok_or_else(|| {
            AttachmentError::UnsupportedType(if ext.is_empty() { "(no extension)".to_string() } else { ext.clone() })
        })?;
        let data = std::fs::read(path).map_err(|e| AttachmentError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Self::new(filename, mime_type, data)
    }

    /// Parse `data:<mimetype>;base64,<data>`.
    pub fn from_data_uri(filename: impl Into<String>, uri: &str) -> Result<Self, AttachmentError> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| AttachmentError::MalformedDataUri("missing data: scheme".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| AttachmentError::MalformedDataUri("missing payload separator".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| AttachmentError::MalformedDataUri("payload is not base64".to_string()))?;
        let filename = filename.into();
        // Drop parameters such as `;charset=utf-8`.
        let mut mime_type = mime_type.split(';').next().unwrap_or_default();
        // Browsers label unknown files (often .md) as octet-stream.
        if mime_type.is_empty() || mime_type == "application/octet-stream" {
            let ext = Path::new(&filename)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            mime_type = mime_for_extension(&ext).unwrap_or(mime_type);
        }
        if mime_type.is_empty() {
            return Err(AttachmentError::MalformedDataUri("missing MIME type".to_string()));
        }
        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| AttachmentError::MalformedDataUri(e.to_string()))?;
        Self::new(filename, mime_type, data)
    }

    pub fn to_data_uri(&self) -> String {
        encode_data_uri(&self.mime_type, &self.data)
    }

    pub fn base64_data(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}

pub fn is_accepted_type(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || ACCEPTED_DOCUMENT_TYPES.contains(&mime_type)
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "bmp" => Some("image/bmp"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        _ => None,
    }
}

/// The transient slot between "file chosen" and "turn submitted or cancelled".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentStaging {
    pub attachment: Attachment,
    pub preview: String,
}

impl AttachmentStaging {
    pub fn new(attachment: Attachment) -> Self {
        let preview = attachment.to_data_uri();
        Self { attachment, preview }
    }

    pub fn view(&self) -> StagingView {
        StagingView {
            filename: self.attachment.filename.clone(),
            mime_type: self.attachment.mime_type.clone(),
            preview: self.preview.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingView {
    pub filename: String,
    pub mime_type: String,
    pub preview: String,
}
