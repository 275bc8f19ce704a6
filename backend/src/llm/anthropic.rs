//! Anthropic Messages API client with SSE streaming.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{retry::Never, Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{InferenceClient, InferenceError, InferenceRequest, TextStream};

/// Connection settings for the Anthropic API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// API key (falls back to `ANTHROPIC_API_KEY`)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    8000
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Anthropic streaming client.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub const API_VERSION: &'static str = "2023-06-01";

    /// Create a client from settings; fails when no API key is available.
    pub fn from_settings(settings: &InferenceSettings) -> Result<Self, InferenceError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(InferenceError::NotConfigured)?;

        Ok(Self {
            client: Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    fn build_request(&self, request: InferenceRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            stream: true,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    ContentBlock::Document {
                        source: DocumentSource {
                            source_type: "base64",
                            media_type: request.media_type,
                            data: request.document_base64,
                        },
                    },
                    ContentBlock::Text {
                        text: request.instruction,
                    },
                ],
            }],
        }
    }
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn open_stream(&self, request: InferenceRequest) -> Result<TextStream, InferenceError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request(request);
        debug!("Opening Anthropic stream (model: {})", self.model);

        let http_request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let mut es =
            EventSource::new(http_request).map_err(|e| InferenceError::Connect(e.to_string()))?;
        // Retries belong to the caller
        es.set_retry_policy(Box::new(Never));

        // Wait until the service accepts the request
        match es.next().await {
            Some(Ok(Event::Open)) => debug!("Anthropic stream open"),
            Some(Ok(Event::Message(msg))) => {
                es.close();
                return Err(InferenceError::Stream(format!(
                    "unexpected event before open: {}",
                    msg.event
                )));
            }
            Some(Err(e)) => {
                es.close();
                return Err(open_error(e).await);
            }
            None => {
                return Err(InferenceError::Connect(
                    "stream closed before opening".to_string(),
                ))
            }
        }

        let stream = futures::stream::unfold(Some(es), |state| async move {
            let mut es = state?;
            loop {
                match es.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => match decode_event(&msg.data) {
                        Ok(Decoded::Text(text)) => return Some((Ok(text), Some(es))),
                        Ok(Decoded::Skip) => continue,
                        Ok(Decoded::Stop) => {
                            es.close();
                            return None;
                        }
                        Err(e) => {
                            es.close();
                            return Some((Err(e), None));
                        }
                    },
                    // A completed message always ends with message_stop
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        warn!("Anthropic stream ended before message_stop");
                        es.close();
                        return Some((
                            Err(InferenceError::Stream(
                                "stream ended before message_stop".to_string(),
                            )),
                            None,
                        ));
                    }
                    Some(Err(e)) => {
                        warn!("Anthropic stream error: {}", e);
                        es.close();
                        return Some((Err(InferenceError::Stream(e.to_string())), None));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Map an error raised before the stream opened.
async fn open_error(error: reqwest_eventsource::Error) -> InferenceError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let message = response.text().await.unwrap_or_default();
            InferenceError::Api {
                status: status.as_u16(),
                message,
            }
        }
        other => InferenceError::Connect(other.to_string()),
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    stream: bool,
    messages: Vec<RequestMessage>,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Document { source: DocumentSource },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct DocumentSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

// ============================================================================
// Streaming
// ============================================================================

/// Anthropic SSE stream events we act on.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta {
        delta: Delta,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, PartialEq)]
enum Decoded {
    Text(String),
    Skip,
    Stop,
}

fn decode_event(data: &str) -> Result<Decoded, InferenceError> {
    match serde_json::from_str::<StreamEvent>(data)? {
        StreamEvent::ContentBlockDelta { delta } => match delta.text {
            Some(text) if !text.is_empty() => Ok(Decoded::Text(text)),
            _ => Ok(Decoded::Skip),
        },
        StreamEvent::MessageStop => Ok(Decoded::Stop),
        StreamEvent::Error { error } => Err(InferenceError::Stream(format!(
            "{}: {}",
            error.error_type, error.message
        ))),
        StreamEvent::Other => Ok(Decoded::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisError, AnalysisOrchestrator};
    use crate::test_support::{document, prompt, RecordingSink};
    use legal_mcp_types::ProgressEvent;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    const PARTIAL_BODY: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"EXECUTIVE SUMMARY: partial\"}}\n\n";

    const STOP_EVENT: &str = "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";

    /// Serve one SSE response with `body`, then close the connection.
    async fn serve_once(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Drain the request so closing does not reset the connection
            let mut request = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{}",
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn client_for(base_url: String) -> AnthropicClient {
        AnthropicClient::from_settings(&InferenceSettings {
            api_key: Some("test-key".to_string()),
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    fn sample_request() -> InferenceRequest {
        InferenceRequest {
            instruction: "Summarize the lease".to_string(),
            media_type: "application/pdf".to_string(),
            document_base64: "JVBERi0=".to_string(),
        }
    }

    fn client() -> AnthropicClient {
        AnthropicClient::from_settings(&InferenceSettings {
            api_key: Some("test-key".to_string()),
            base_url: "http://localhost:9999/".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_api_key() {
        let result = AnthropicClient::from_settings(&InferenceSettings::default());
        assert!(matches!(result, Err(InferenceError::NotConfigured)));

        let result = AnthropicClient::from_settings(&InferenceSettings {
            api_key: Some(String::new()),
            ..Default::default()
        });
        assert!(matches!(result, Err(InferenceError::NotConfigured)));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url, "http://localhost:9999");
    }

    #[test]
    fn test_request_body_shape() {
        let body = client().build_request(InferenceRequest {
            instruction: "Summarize the lease".to_string(),
            media_type: "application/pdf".to_string(),
            document_base64: "JVBERi0=".to_string(),
        });
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["max_tokens"], 8000);
        assert_eq!(json["stream"], true);
        let content = &json["messages"][0]["content"];
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "document");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "application/pdf");
        assert_eq!(content[0]["source"]["data"], "JVBERi0=");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "Summarize the lease");
    }

    #[test]
    fn test_decode_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert_eq!(decode_event(data).unwrap(), Decoded::Text("Hello".to_string()));
    }

    #[test]
    fn test_decode_skips_bookkeeping_events() {
        let events = [
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":10}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{"}}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
        ];
        for data in events {
            assert_eq!(decode_event(data).unwrap(), Decoded::Skip, "{}", data);
        }
    }

    #[test]
    fn test_decode_stop_and_error() {
        assert_eq!(
            decode_event(r#"{"type":"message_stop"}"#).unwrap(),
            Decoded::Stop
        );

        let err = decode_event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "stream failed: overloaded_error: Overloaded");
    }

    #[tokio::test]
    async fn test_stream_with_message_stop_ends_cleanly() {
        let base_url = serve_once(format!("{}{}", PARTIAL_BODY, STOP_EVENT)).await;
        let stream = client_for(base_url)
            .open_stream(sample_request())
            .await
            .unwrap();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "EXECUTIVE SUMMARY: partial");
    }

    #[tokio::test]
    async fn test_connection_closed_before_message_stop_is_an_error() {
        let base_url = serve_once(PARTIAL_BODY.to_string()).await;
        let stream = client_for(base_url)
            .open_stream(sample_request())
            .await
            .unwrap();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "EXECUTIVE SUMMARY: partial");
        assert!(matches!(items[1], Err(InferenceError::Stream(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_not_a_completed_analysis() {
        let base_url = serve_once(PARTIAL_BODY.to_string()).await;
        let orchestrator = AnalysisOrchestrator::new(Arc::new(client_for(base_url)));
        let sink = RecordingSink::default();

        let result = orchestrator
            .run(
                &prompt("Lease Review"),
                &document("lease.pdf"),
                &sink,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(AnalysisError::Stream(_))));
        let events = sink.events();
        assert!(matches!(events[0], ProgressEvent::Started { .. }));
        assert!(!events.iter().any(ProgressEvent::is_terminal));
    }

    #[test]
    fn test_decode_invalid_json() {
        assert!(matches!(
            decode_event("not json"),
            Err(InferenceError::Decode(_))
        ));
    }
}
