use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sse::SseDecoder;
use super::{ChunkStream, CompletionService};
use crate::config::Config;
use crate::error::ChatError;
use crate::transcript::{Message, Role};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Error object the API can send in place of a result, including mid-stream
#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, or the error / block reason
    fn into_text(self) -> Result<String, ChatError> {
        if let Some(error) = self.error {
            let body = match error.status {
                Some(status) if !status.is_empty() => format!("{} ({})", error.message, status),
                _ => error.message,
            };
            return Err(ChatError::Api { status: error.code, body });
        }
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ChatError::Blocked(reason));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_endpoint(api_key, DEFAULT_BASE_URL, DEFAULT_MODEL)
    }

    pub fn with_endpoint(api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Build the process-wide client from config and environment
    pub fn from_config(config: &Config) -> Result<Self, ChatError> {
        let api_key = config.resolve_api_key().ok_or(ChatError::MissingApiKey)?;
        Ok(Self::with_endpoint(
            &api_key,
            config.base_url_or_default(),
            config.model_or_default(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(&self, url: &str, request: &GeminiRequest<'_>) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }
        Ok(response)
    }
}

/// Prior turns followed by the live prompt, in the wire shape
fn build_contents(prompt: &str, prior_turns: &[Message]) -> Vec<GeminiContent> {
    prior_turns
        .iter()
        .map(|m| GeminiContent {
            role: m.role.as_str(),
            parts: vec![GeminiPart { text: m.text.clone() }],
        })
        .chain(std::iter::once(GeminiContent {
            role: Role::User.as_str(),
            parts: vec![GeminiPart {
                text: prompt.to_string(),
            }],
        }))
        .collect()
}

fn parse_chunk(payload: &str) -> Result<String, ChatError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| ChatError::MalformedStream(e.to_string()))?;
    response.into_text()
}

struct ChunkState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ChatError>>,
    finished: bool,
}

impl ChunkState {
    fn queue(&mut self, payloads: Vec<String>) {
        self.pending.extend(payloads.iter().map(|p| parse_chunk(p)));
    }
}

/// Turn an SSE response body into a stream of text chunks, in arrival order
fn chunk_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> ChunkStream {
    let state = ChunkState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = state.decoder.feed(&bytes);
                    state.queue(payloads);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e.into()));
                }
                None => {
                    state.finished = true;
                    let payloads = state.decoder.finish();
                    state.queue(payloads);
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl CompletionService for GeminiClient {
    async fn stream_completion(
        &self,
        prompt: &str,
        prior_turns: &[Message],
    ) -> Result<ChunkStream, ChatError> {
        let request = GeminiRequest {
            contents: build_contents(prompt, prior_turns),
            generation_config: None,
        };
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));

        tracing::debug!(model = %self.model, prior_turns = prior_turns.len(), "opening chat stream");
        let response = self.post(&url, &request).await?;
        Ok(chunk_stream(response.bytes_stream().boxed()))
    }

    async fn structured_completion(&self, prompt: &str, schema: &Value) -> Result<String, ChatError> {
        let request = GeminiRequest {
            contents: build_contents(prompt, &[]),
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: schema,
            }),
        };

        tracing::debug!(model = %self.model, "requesting structured completion");
        let response = self.post(&self.url("generateContent"), &request).await?;
        let body = response.text().await?;
        let text = parse_chunk(&body).map_err(|e| match e {
            ChatError::MalformedStream(reason) => ChatError::MalformedResponse(reason),
            other => other,
        })?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_from(chunks: Vec<&'static [u8]>) -> BoxStream<'static, reqwest::Result<Bytes>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
    }

    #[test]
    fn test_contents_put_prompt_last() {
        let history = vec![Message::user("hi"), Message::model("hello")];
        let contents = build_contents("next", &history);
        let json = serde_json::to_value(&contents).unwrap();

        assert_eq!(json.as_array().unwrap().len(), 3);
        assert_eq!(json[0]["role"], "user");
        assert_eq!(json[1]["role"], "model");
        assert_eq!(json[1]["parts"][0]["text"], "hello");
        assert_eq!(json[2]["parts"][0]["text"], "next");
    }

    #[test]
    fn test_structured_request_shape() {
        let schema = serde_json::json!({"type": "OBJECT"});
        let request = GeminiRequest {
            contents: build_contents("p", &[]),
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &schema,
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["responseSchema"]["type"], "OBJECT");

        let plain = GeminiRequest {
            contents: build_contents("p", &[]),
            generation_config: None,
        };
        assert!(serde_json::to_value(&plain).unwrap().get("generationConfig").is_none());
    }

    #[test]
    fn test_parse_chunk_joins_parts() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(parse_chunk(payload).unwrap(), "Hello");
    }

    #[test]
    fn test_parse_chunk_without_text_is_empty() {
        let payload = r#"{"candidates":[{"finishReason":"STOP"}],"usageMetadata":{}}"#;
        assert_eq!(parse_chunk(payload).unwrap(), "");
    }

    #[test]
    fn test_parse_chunk_blocked() {
        let payload = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(parse_chunk(payload), Err(ChatError::Blocked(r)) if r == "SAFETY"));
    }

    #[test]
    fn test_parse_chunk_api_error() {
        let payload = r#"{"error":{"code":429,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        match parse_chunk(payload) {
            Err(ChatError::Api { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota (RESOURCE_EXHAUSTED)");
            }
            other => panic!("expected api error, got {:?}", other.map(|_| ())),
        }

        let bare = r#"{"error":{"code":500,"message":"Internal error"}}"#;
        assert!(matches!(parse_chunk(bare), Err(ChatError::Api { status: 500, body }) if body == "Internal error"));
    }

    #[test]
    fn test_parse_chunk_garbage() {
        assert!(matches!(parse_chunk("not json"), Err(ChatError::MalformedStream(_))));
    }

    #[test]
    fn test_from_config_uses_configured_endpoint() {
        let config = Config {
            api_key: Some("from-config".to_string()),
            model: Some("gemini-2.0-flash".to_string()),
            base_url: Some("http://localhost:9".to_string()),
            ..Config::new()
        };
        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(client.model(), "gemini-2.0-flash");
        assert_eq!(client.url("generateContent"), "http://localhost:9/models/gemini-2.0-flash:generateContent");
    }

    #[test]
    fn test_url_layout() {
        let client = GeminiClient::with_endpoint("k", "http://localhost:9/v1beta/", "m");
        assert_eq!(client.url("generateContent"), "http://localhost:9/v1beta/models/m:generateContent");
    }

    #[tokio::test]
    async fn test_chunk_stream_decodes_in_order() {
        let body = body_from(vec![
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\nda",
            b"ta: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]}}]}\r\n\r\n",
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}]}}]}",
        ]);
        let chunks: Vec<String> = chunk_stream(body)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn test_chunk_stream_surfaces_bad_payload() {
        let body = body_from(vec![b"data: {\"candidates\":[]}\n\ndata: oops\n\n"]);
        let items: Vec<Result<String, ChatError>> = chunk_stream(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "");
        assert!(matches!(items[1], Err(ChatError::MalformedStream(_))));
    }

    #[tokio::test]
    async fn test_chunk_stream_surfaces_error_payload() {
        let body = body_from(vec![
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n",
            b"data: {\"error\":{\"code\":500,\"message\":\"Internal error\"}}\n\n",
        ]);
        let items: Vec<Result<String, ChatError>> = chunk_stream(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(ChatError::Api { status: 500, .. })));
    }
}
