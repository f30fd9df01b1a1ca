//! [`SupabaseClient`] speaks to a Supabase project over its three public surfaces: PostgREST for
//! rows, Storage for images, and Realtime for change feeds.

mod realtime;
mod rest;
mod storage;

use std::sync::Arc;

use crate::config::{RealtimeConfig, SupabaseConfig};

pub use realtime::{PhoenixMessage, decode_postgres_change};

#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    config: Arc<SupabaseConfig>,
    realtime: RealtimeConfig,
    access_token: Option<Arc<str>>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig, realtime: RealtimeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
            realtime,
            access_token: None,
        }
    }

    /// Sends requests as a signed-in user instead of the anonymous role.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(Arc::from(access_token.into()));
        self
    }

    fn base_url(&self) -> &str {
        self.config.supabase_url.trim_end_matches('/')
    }

    fn bearer(&self) -> &str {
        self.access_token
            .as_deref()
            .unwrap_or(&self.config.supabase_anon_key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.config.supabase_anon_key)
            .bearer_auth(self.bearer())
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("url", &self.config.supabase_url)
            .field("signed_in", &self.access_token.is_some())
            .finish()
    }
}

/// Pulls a readable message out of an error response. PostgREST and Storage both answer with a
/// JSON object carrying `message` (Storage sometimes uses `error`).
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
    });
    match message {
        Some(message) => format!("{status}: {message}"),
        None if body.trim().is_empty() => status.to_string(),
        None => format!("{status}: {}", body.trim()),
    }
}
