use super::{Attachment, AttachmentKind, GenerationError, Generator};
use crate::config::ApiConfig;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
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
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

impl GeminiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, GenerationError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        info!("Gemini client initialized (model: {})", config.model);
        Ok(Self {
            client: builder.build()?,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.key.clone(),
            model: config.model.clone(),
        })
    }

    async fn send_request(&self, body: &GenerateContentRequest) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        debug!("Sending generateContent request ({} parts)", body.contents[0].parts.len());
        let resp = self.client.post(&url).json(body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status,
                message: error_message(&body),
            });
        }

        let text = resp.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        extract_reply(parsed)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        attachment: Option<&Attachment>,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let body = build_request(prompt, attachment);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Generation request cancelled");
                Err(GenerationError::Cancelled)
            }
            result = self.send_request(&body) => result,
        }
    }
}

fn build_request(prompt: &str, attachment: Option<&Attachment>) -> GenerateContentRequest {
    let mut parts = vec![Part::Text {
        text: prompt.to_string(),
    }];

    if let Some(attachment) = attachment {
        match attachment.kind() {
            AttachmentKind::Image => parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: BASE64_STANDARD.encode(&attachment.data),
                },
            }),
            AttachmentKind::Document => parts.push(Part::Text {
                text: format!("\nFile contents:\n{}", attachment.text()),
            }),
            AttachmentKind::Unsupported => {
                warn!(
                    "Ignoring attachment '{}' with unsupported type {}",
                    attachment.filename, attachment.mime_type
                );
            }
        }
    }

    GenerateContentRequest {
        contents: vec![Content { parts }],
    }
}

fn extract_reply(response: GenerateContentResponse) -> Result<String, GenerationError> {
    response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
        .ok_or_else(|| {
            GenerationError::MalformedResponse("response contained no candidate text".into())
        })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|wrapper| {
            let message = wrapper.error.message?;
            Some(match wrapper.error.status {
                Some(status) if !status.is_empty() => format!("{}: {}", status, message),
                _ => message,
            })
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    fn request_json(prompt: &str, attachment: Option<&Attachment>) -> serde_json::Value {
        serde_json::to_value(build_request(prompt, attachment)).unwrap()
    }

    fn parse(body: &str) -> Result<String, GenerationError> {
        extract_reply(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn text_only_request() {
        assert_eq!(
            request_json("hello", None),
            json!({"contents": [{"parts": [{"text": "hello"}]}]})
        );
    }

    #[test]
    fn image_is_sent_as_inline_data() {
        let image = Attachment::new("dot.png", "image/png", vec![0x89, b'P', b'N', b'G']);

        assert_eq!(
            request_json("what is this?", Some(&image)),
            json!({"contents": [{"parts": [
                {"text": "what is this?"},
                {"inline_data": {"mime_type": "image/png", "data": "iVBORw=="}}
            ]}]})
        );
    }

    #[test]
    fn text_and_pdf_are_appended_as_file_contents() {
        let notes = Attachment::new("notes.txt", "text/plain", b"buy milk".to_vec());
        let pdf = Attachment::new("doc.pdf", "application/pdf", b"%PDF-1.4".to_vec());

        assert_eq!(
            request_json("summarize", Some(&notes)),
            json!({"contents": [{"parts": [
                {"text": "summarize"},
                {"text": "\nFile contents:\nbuy milk"}
            ]}]})
        );
        assert_eq!(
            request_json("summarize", Some(&pdf))["contents"][0]["parts"][1]["text"],
            json!("\nFile contents:\n%PDF-1.4")
        );
    }

    #[test]
    fn unsupported_attachment_is_ignored() {
        let archive = Attachment::new("a.zip", "application/zip", vec![1, 2, 3]);

        assert_eq!(
            request_json("hi", Some(&archive)),
            json!({"contents": [{"parts": [{"text": "hi"}]}]})
        );
    }

    #[test]
    fn reply_is_first_text_of_first_candidate() {
        let body = r#"{"candidates": [
            {"content": {"parts": [{"inlineData": {}}, {"text": "hi there"}, {"text": "ignored"}]}},
            {"content": {"parts": [{"text": "second candidate"}]}}
        ]}"#;

        assert_eq!(parse(body).unwrap(), "hi there");
    }

    #[test]
    fn missing_reply_is_malformed() {
        for body in [
            r#"{}"#,
            r#"{"candidates": []}"#,
            r#"{"candidates": [{"finishReason": "SAFETY"}]}"#,
            r#"{"candidates": [{"content": {"parts": []}}]}"#,
        ] {
            assert!(matches!(
                parse(body),
                Err(GenerationError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn error_message_prefers_api_envelope() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "INVALID_ARGUMENT: API key not valid");
        assert_eq!(error_message("upstream down"), "upstream down");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let client = GeminiClient::new(&ApiConfig {
            key: "test".into(),
            url: "http://127.0.0.1:9".into(),
            model: "gemini-1.5-flash".into(),
            timeout_secs: Some(1),
        })
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.generate("hello", None, &cancel).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serves a single request on a local port. Without a response the
    /// connection is held open and never answered.
    async fn serve_once(response: Option<String>) -> (GeminiClient, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let _ = request_tx.send(request);
            match response {
                Some(response) => socket.write_all(response.as_bytes()).await.unwrap(),
                None => std::future::pending::<()>().await,
            }
        });

        let client = GeminiClient::new(&ApiConfig {
            key: "secret".into(),
            url: format!("http://{}", addr),
            model: "gemini-test".into(),
            timeout_secs: Some(10),
        })
        .unwrap();
        (client, request_rx)
    }

    #[tokio::test]
    async fn posts_prompt_and_returns_reply() {
        let body = r#"{"candidates": [{"content": {"parts": [{"text": "hi there"}]}}]}"#;
        let (client, request) = serve_once(Some(http_response("200 OK", body))).await;

        let reply = client
            .generate("hello", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply, "hi there");
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /models/gemini-test:generateContent?key=secret HTTP/1.1"));
        assert!(request.contains(r#"{"contents":[{"parts":[{"text":"hello"}]}]}"#));
    }

    #[tokio::test]
    async fn stop_while_waiting_resolves_cancelled() {
        let (client, request) = serve_once(None).await;
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                request.await.unwrap();
                cancel.cancel();
            })
        };

        let result = client.generate("long task", None, &cancel).await;

        assert!(result.unwrap_err().is_cancelled());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_becomes_status() {
        let body = r#"{"error": {"code": 500, "message": "boom", "status": "INTERNAL"}}"#;
        let (client, _request) =
            serve_once(Some(http_response("500 Internal Server Error", body))).await;

        let error = client
            .generate("hello", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(!error.is_cancelled());
        match error {
            GenerationError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "INTERNAL: boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_success_body_is_malformed() {
        let (client, _request) = serve_once(Some(http_response("200 OK", "{}"))).await;

        let error = client
            .generate("hello", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, GenerationError::MalformedResponse(_)));
    }
}
