use reqwest::header::CONTENT_TYPE;
use reqwest::RequestBuilder;
use serde::Serialize;
use tracing::debug;

use super::{ContentRequest, GenerateContentResponse, Part};
use crate::error::StudioError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerateContentBody<'a> {
    contents: [ContentBody<'a>; 1],
    generation_config: GenerationConfigBody<'a>,
}

#[derive(Debug, Serialize)]
struct ContentBody<'a> {
    parts: &'a [Part],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigBody<'a> {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfigBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfigBody<'a> {
    aspect_ratio: &'a str,
}

impl<'a> GenerateContentBody<'a> {
    /// Wire body; `with_image_config` controls whether the aspect ratio travels.
    pub(super) fn new(request: &'a ContentRequest, with_image_config: bool) -> Self {
        let image_config = if with_image_config {
            request
                .aspect_ratio
                .as_deref()
                .map(|aspect_ratio| ImageConfigBody { aspect_ratio })
        } else {
            None
        };
        Self {
            contents: [ContentBody {
                parts: &request.parts,
            }],
            generation_config: GenerationConfigBody {
                temperature: request.temperature,
                seed: request.seed,
                image_config,
            },
        }
    }
}

/// Sends the JSON body and turns the reply into a parsed response or an error
/// that keeps the service's status and body text.
pub(super) async fn send(
    builder: RequestBuilder,
    body: &GenerateContentBody<'_>,
) -> Result<GenerateContentResponse, StudioError> {
    let response = builder
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await?;
    debug!(status = status.as_u16(), bytes = text.len(), "image service replied");
    if !status.is_success() {
        return Err(StudioError::Transport {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|err| StudioError::InvalidResponse(err.to_string()))
}

#[cfg(test)]
pub(super) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one connection, answers with `status` and `body`, and yields the
    /// raw request text (head and body).
    pub async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let read = stream.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..read]);
                if request_complete(&raw) {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + content_length
    }

    pub fn request_body(raw: &str) -> serde_json::Value {
        let body = raw.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("");
        serde_json::from_str(body).unwrap()
    }
}
