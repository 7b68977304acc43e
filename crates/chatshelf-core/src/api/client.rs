//! REST client for the chat backend.
//!
//! Every endpoint is a JSON `POST`. Transient failures (network errors,
//! 5xx, 429) are retried with linear backoff; anything else is returned
//! immediately.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::models::{Character, Persona, RawChatList};

use super::{ApiError, DataSource};

const CSRF_PATH: &str = "/csrf-token";
const CSRF_HEADER: &str = "X-CSRF-Token";

const CHARACTERS_PATH: &str = "/api/characters/all";
const CHATS_PATH: &str = "/api/characters/chats";
const DELETE_CHAT_PATH: &str = "/api/chats/delete";
const DELETE_CHARACTER_PATH: &str = "/api/characters/delete";
const AVATARS_PATH: &str = "/api/avatars/get";
const DELETE_AVATAR_PATH: &str = "/api/avatars/delete";
const SETTINGS_PATH: &str = "/api/settings/get";

#[derive(Debug, Deserialize)]
struct CsrfResponse {
    token: String,
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// The chats endpoint answers `{"error": true}` instead of a status code
/// when it cannot list a character's chats.
fn parse_chat_list(value: Value) -> Result<RawChatList, ApiError> {
    if value.as_object().is_some_and(|o| o.contains_key("error")) {
        return Err(ApiError::InvalidResponse(
            "Backend reported an error listing chats".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Unexpected chat listing: {}", e)))
}

/// Persona display names from the settings payload. Settings arrive as a
/// JSON string nested inside the response.
fn persona_names(settings_response: &Value) -> HashMap<String, String> {
    let settings: Value = match settings_response.get("settings") {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    settings
        .pointer("/power_user/personas")
        .and_then(Value::as_object)
        .map(|personas| {
            personas
                .iter()
                .filter_map(|(key, name)| Some((key.clone(), name.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn build_personas(avatars: Vec<String>, names: &HashMap<String, String>) -> Vec<Persona> {
    avatars
        .into_iter()
        .map(|key| Persona {
            name: names.get(&key).cloned().unwrap_or_else(|| key.clone()),
            key,
        })
        .collect()
}

/// `DataSource` over HTTP.
pub struct HttpSource {
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    csrf_token: Mutex<Option<String>>,
}

impl HttpSource {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Use a preconfigured client; its own timeout settings apply.
    pub fn with_client(client: Client, config: &ApiConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            csrf_token: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Token for state-changing requests. Backends running without CSRF
    /// protection have no token endpoint; that is not an error.
    async fn csrf_token(&self) -> Result<Option<String>, ApiError> {
        let cached = self.csrf_token.lock().clone();
        if cached.is_some() {
            return Ok(cached);
        }

        let response = self.client.get(self.url(CSRF_PATH)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Backend has no CSRF endpoint");
            return Ok(None);
        }
        let response = Self::check_response(response).await?;
        let parsed: CsrfResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("CSRF token: {}", e)))?;

        *self.csrf_token.lock() = Some(parsed.token.clone());
        Ok(Some(parsed.token))
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        no_cache: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = self.csrf_token().await? {
            request = request.header(CSRF_HEADER, token);
        }
        if no_cache {
            request = request.header(header::CACHE_CONTROL, "no-cache");
        }

        let result = match request.send().await {
            Ok(response) => Self::check_response(response).await,
            Err(e) => Err(e.into()),
        };
        if matches!(result, Err(ApiError::Rejected { .. })) {
            // Stale token; fetch a new one next time
            self.csrf_token.lock().take();
        }
        result
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        no_cache: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            match self.send_once(&url, body, no_cache).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.retry_delay, attempt);
                    warn!(
                        url = %url,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        no_cache: bool,
    ) -> Result<T, ApiError> {
        let response = self.post(path, body, no_cache).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", path, e)))
    }

    /// Fire a delete and report whether the backend accepted it.
    async fn post_delete(&self, path: &str, body: Value) -> bool {
        match self.post(path, &body, false).await {
            Ok(_) => true,
            Err(e) => {
                warn!(path = path, error = %e, "Delete request failed");
                false
            }
        }
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn fetch_personas(&self) -> Result<Vec<Persona>, ApiError> {
        let avatars: Vec<String> = self.post_json(AVATARS_PATH, &json!({}), false).await?;

        let names = match self.post_json::<Value, _>(SETTINGS_PATH, &json!({}), false).await {
            Ok(settings) => persona_names(&settings),
            Err(e) => {
                warn!(error = %e, "Could not load persona names, using avatar keys");
                HashMap::new()
            }
        };

        let personas = build_personas(avatars, &names);
        debug!(count = personas.len(), "Fetched personas");
        Ok(personas)
    }

    async fn fetch_characters(&self) -> Result<Vec<Character>, ApiError> {
        let characters: Vec<Character> =
            self.post_json(CHARACTERS_PATH, &json!({}), false).await?;
        debug!(count = characters.len(), "Fetched characters");
        Ok(characters)
    }

    async fn fetch_chats(
        &self,
        character_id: &str,
        force_refresh: bool,
    ) -> Result<RawChatList, ApiError> {
        let value: Value = self
            .post_json(CHATS_PATH, &json!({ "avatar_url": character_id }), force_refresh)
            .await?;
        let chats = parse_chat_list(value)?;
        debug!(character = character_id, count = chats.len(), "Fetched chats");
        Ok(chats)
    }

    async fn delete_chat(&self, file_name: &str, character_id: &str) -> bool {
        self.post_delete(
            DELETE_CHAT_PATH,
            json!({ "chat_file": file_name, "avatar_url": character_id }),
        )
        .await
    }

    async fn delete_persona(&self, key: &str) -> bool {
        self.post_delete(DELETE_AVATAR_PATH, json!({ "avatar": key }))
            .await
    }

    async fn delete_character(&self, character_id: &str) -> bool {
        self.post_delete(
            DELETE_CHARACTER_PATH,
            json!({ "avatar_url": character_id, "delete_chats": true }),
        )
        .await
    }
}
