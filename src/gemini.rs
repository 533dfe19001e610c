//! google generative language (gemini) rest backend.
//!
//! generation config and safety settings are sent verbatim with every
//! `generateContent` call. the handle keeps the conversation contents and only
//! grows it on a successful reply, so failed exchanges never reach the model.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ChatConfig, DEFAULT_GEMINI_BASE_URL, GEMINI_API_KEY_VAR, GenerationConfig, SafetySetting, SessionSettings};
use crate::endpoint::{ChatEndpoint, ChatError, HistoryTurn, SessionHandle, TurnRole};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Content {
    role: TurnRole,
    parts: Vec<Part>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Part {
    text: String,
}

impl From<HistoryTurn> for Content {
    fn from(turn: HistoryTurn) -> Self {
        Self { role: turn.role, parts: vec![Part { text: turn.text }] }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// maps a non-2xx reply to `ChatError::Status`, preferring the api's message.
fn status_error(status: u16, body: &str) -> ChatError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());
    ChatError::Status { status, message }
}

fn parse_generate_response(status: u16, body: &str) -> Result<String, ChatError> {
    if !(200..300).contains(&status) {
        return Err(status_error(status, body));
    }
    let resp: GenerateResponse = serde_json::from_str(body)?;

    let first = resp.candidates.into_iter().next();
    let text: String = first
        .as_ref()
        .and_then(|c| c.content.as_ref())
        .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ChatError::Blocked(reason));
    }
    match first.and_then(|c| c.finish_reason) {
        Some(reason) if reason != "STOP" => Err(ChatError::Blocked(reason)),
        _ => Err(ChatError::EmptyResponse),
    }
}

struct HttpRequest {
    url: String,
    api_key: String,
    body: Option<serde_json::Value>,
}

#[cfg(not(target_arch = "wasm32"))]
async fn http_call(req: HttpRequest) -> Result<(u16, String), ChatError> {
    // ureq is blocking; keep it off the async workers
    tokio::task::spawn_blocking(move || blocking_call(req))
        .await
        .map_err(|e| ChatError::Transport(e.to_string()))?
}

#[cfg(not(target_arch = "wasm32"))]
fn blocking_call(req: HttpRequest) -> Result<(u16, String), ChatError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into();
    let transport = |e: ureq::Error| ChatError::Transport(e.to_string());

    let res = match req.body {
        Some(body) => agent
            .post(&req.url)
            .header("x-goog-api-key", &req.api_key)
            .send_json(&body)
            .map_err(transport)?,
        None => agent
            .get(&req.url)
            .header("x-goog-api-key", &req.api_key)
            .header("accept", "application/json")
            .call()
            .map_err(transport)?,
    };
    let status = res.status().as_u16();
    let text = res.into_body().read_to_string().map_err(transport)?;
    Ok((status, text))
}

#[cfg(target_arch = "wasm32")]
async fn http_call(req: HttpRequest) -> Result<(u16, String), ChatError> {
    use gloo_net::http::Request;

    let transport = |e: gloo_net::Error| ChatError::Transport(e.to_string());
    let resp = match req.body {
        Some(body) => Request::post(&req.url)
            .header("x-goog-api-key", &req.api_key)
            .json(&body)
            .map_err(transport)?
            .send()
            .await
            .map_err(transport)?,
        None => Request::get(&req.url)
            .header("x-goog-api-key", &req.api_key)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(transport)?,
    };
    let status = resp.status();
    let text = resp.text().await.map_err(transport)?;
    Ok((status, text))
}

pub struct GeminiEndpoint {
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiEndpoint {
    pub fn new(config: &ChatConfig) -> Self {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_GEMINI_BASE_URL);
        Self {
            base_url: base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn model_url(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!("{}/models/{}", self.base_url, model)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ChatEndpoint for GeminiEndpoint {
    async fn start_session(
        &self,
        settings: &SessionSettings,
        history: Vec<HistoryTurn>,
    ) -> Result<Arc<dyn SessionHandle>, ChatError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(ChatError::MissingApiKey(GEMINI_API_KEY_VAR))?;

        // one round trip to confirm the model exists and the key is accepted
        let probe_url = self.model_url();
        info!(target: "bevy_genai_chat", "gemini: probing {}", probe_url);
        let (status, body) = http_call(HttpRequest {
            url: probe_url,
            api_key: api_key.clone(),
            body: None,
        })
        .await?;
        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }

        info!(target: "bevy_genai_chat",
            "gemini: session ready model={} history_turns={} safety_settings={}",
            self.model, history.len(), settings.safety.len()
        );
        Ok(Arc::new(GeminiSession {
            generate_url: format!("{}:generateContent", self.model_url()),
            api_key,
            settings: settings.clone(),
            contents: Mutex::new(history.into_iter().map(Content::from).collect()),
        }))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

struct GeminiSession {
    generate_url: String,
    api_key: String,
    settings: SessionSettings,
    contents: Mutex<Vec<Content>>,
}

impl GeminiSession {
    fn request_body(&self, contents: &[Content]) -> Result<serde_json::Value, ChatError> {
        Ok(serde_json::to_value(GenerateRequest {
            contents,
            generation_config: &self.settings.generation,
            safety_settings: &self.settings.safety,
        })?)
    }

    fn lock_contents(&self) -> std::sync::MutexGuard<'_, Vec<Content>> {
        self.contents.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SessionHandle for GeminiSession {
    async fn send(&self, prompt: &str) -> Result<String, ChatError> {
        let user = Content::from(HistoryTurn::user(prompt));
        let body = {
            let mut contents = self.lock_contents().clone();
            contents.push(user.clone());
            self.request_body(&contents)?
        };

        let (status, text) = http_call(HttpRequest {
            url: self.generate_url.clone(),
            api_key: self.api_key.clone(),
            body: Some(body),
        })
        .await?;
        let reply = parse_generate_response(status, &text)?;

        let mut contents = self.lock_contents();
        contents.push(user);
        contents.push(Content::from(HistoryTurn::model(reply.clone())));
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_body_matches_wire_format() {
        let session = GeminiSession {
            generate_url: String::new(),
            api_key: String::new(),
            settings: SessionSettings::default(),
            contents: Mutex::new(Vec::new()),
        };
        let contents = vec![
            Content::from(HistoryTurn::user("hi")),
            Content::from(HistoryTurn::model("hello")),
        ];
        let body = session.request_body(&contents).unwrap();

        assert_eq!(
            body["contents"],
            serde_json::json!([
                { "role": "user", "parts": [{ "text": "hi" }] },
                { "role": "model", "parts": [{ "text": "hello" }] },
            ])
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert_eq!(body["safetySettings"].as_array().map(Vec::len), Some(4));
        assert_eq!(
            body["safetySettings"][3]["category"],
            "HARM_CATEGORY_DANGEROUS_CONTENT"
        );
    }

    #[test]
    fn parses_candidate_text() {
        let body = r#"{
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hi " }, { "text": "there" }] },
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(parse_generate_response(200, body), Ok("Hi there".to_string()));
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let body = r#"{ "promptFeedback": { "blockReason": "SAFETY" } }"#;
        assert_eq!(
            parse_generate_response(200, body),
            Err(ChatError::Blocked("SAFETY".into()))
        );

        let body = r#"{ "candidates": [{ "finishReason": "SAFETY" }] }"#;
        assert_eq!(
            parse_generate_response(200, body),
            Err(ChatError::Blocked("SAFETY".into()))
        );
    }

    #[test]
    fn empty_candidates_are_empty_response() {
        assert_eq!(parse_generate_response(200, "{}"), Err(ChatError::EmptyResponse));
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{ "error": { "code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT" } }"#;
        assert_eq!(
            parse_generate_response(400, body),
            Err(ChatError::Status { status: 400, message: "API key not valid.".into() })
        );
        assert_eq!(
            parse_generate_response(502, "bad gateway"),
            Err(ChatError::Status { status: 502, message: "bad gateway".into() })
        );
    }

    #[test]
    fn malformed_json_is_malformed() {
        assert!(matches!(parse_generate_response(200, "{not json"), Err(ChatError::Malformed(_))));
    }

    #[test]
    fn missing_key_fails_session_start_without_network() {
        let ep = GeminiEndpoint::new(&ChatConfig::default());
        let result = pollster::block_on(ep.start_session(&SessionSettings::default(), Vec::new()));
        assert_eq!(result.err(), Some(ChatError::MissingApiKey(GEMINI_API_KEY_VAR)));
    }

    #[test]
    fn model_url_tolerates_prefixes_and_slashes() {
        let ep = GeminiEndpoint::new(&ChatConfig {
            base_url: Some("https://example.test/v1beta/".into()),
            model: "models/gemini-pro".into(),
            ..default()
        });
        assert_eq!(ep.model_url(), "https://example.test/v1beta/models/gemini-pro");
    }
}
