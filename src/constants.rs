// Environment-backed defaults. `.env` is loaded in main before these are first read.

use std::env;

lazy_static::lazy_static! {
    pub static ref API_BASE: String = env::var("AEON_API_BASE")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref API_KEY: String = ["GEMINI_API_KEY", "GOOGLE_API_KEY"]
        .iter()
        .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_default();
    pub static ref CHAT_MODEL: String = env::var("AEON_CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    pub static ref IMAGE_MODEL: String = env::var("AEON_IMAGE_MODEL").unwrap_or_else(|_| "imagen-4.0-fast-generate-001".to_string());
    pub static ref NEWS_API_BASE: String = env::var("NEWSDATA_API_BASE").unwrap_or_else(|_| "https://newsdata.io".to_string());
    pub static ref NEWS_API_KEY: String = env::var("NEWSDATA_API_KEY").unwrap_or_default();
    pub static ref REQUEST_TIMEOUT_SECS: u64 = env::var("AEON_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
}
