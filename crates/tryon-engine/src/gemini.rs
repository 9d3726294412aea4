use std::thread;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tryon_contracts::ImageAsset;

use crate::backend::{
    truncate_text, ContentPart, GenerativeBackend, ImageCallRequest, MediaDownload, RemoteReply,
    VideoCallRequest, VideoOperation, VideoPoll,
};
use crate::config::EngineConfig;

/// Generative Language API backend: image views through `generateContent`,
/// video previews through a long-running `predictLongRunning` operation.
pub struct GeminiBackend {
    config: EngineConfig,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.config.api_base, model_path, method)
    }

    fn operation_endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.config.api_base, name.trim_start_matches('/'))
    }

    fn post_with_transport_retries(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        let max_retries = self.config.transport_retries;
        for attempt in 0..=max_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", self.config.api_key.as_str())])
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("Gemini request failed ({})", redact(endpoint)));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        "transient Gemini transport failure, retrying"
                    );
                    thread::sleep(self.config.retry_backoff * (attempt as u32 + 1));
                }
            }
        }

        unreachable!("Gemini transport retry loop should always return a response or error")
    }
}

impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_image(&self, request: &ImageCallRequest) -> Result<RemoteReply> {
        let endpoint = self.model_endpoint(&self.config.image_model, "generateContent");
        let payload = build_generate_payload(request);
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let body = response_json_or_error("Gemini", response)?;
        Ok(parse_generate_reply(&body))
    }

    fn start_video(&self, request: &VideoCallRequest) -> Result<VideoOperation> {
        let endpoint = self.model_endpoint(&self.config.video_model, "predictLongRunning");
        let payload = build_video_payload(request);
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        let body = response_json_or_error("Veo", response)?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Veo response missing operation name"))?;
        Ok(VideoOperation {
            name: name.to_string(),
        })
    }

    fn poll_video(&self, operation: &VideoOperation) -> Result<VideoPoll> {
        let endpoint = self.operation_endpoint(&operation.name);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Veo poll request failed ({})", operation.name))?;
        let body = response_json_or_error("Veo poll", response)?;
        parse_video_poll(&body)
    }

    fn download_media(&self, uri: &str) -> Result<MediaDownload> {
        let response = self
            .http
            .get(uri)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("video download request failed ({})", redact(uri)))?;
        let status = response.status().as_u16();
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .context("failed reading video bytes")?
            .to_vec();
        if !(200..300).contains(&status) {
            tracing::warn!(
                status,
                body = %truncate_text(&String::from_utf8_lossy(&bytes), 512),
                "video download failed"
            );
        }
        Ok(MediaDownload {
            status,
            mime_type,
            bytes,
        })
    }
}

fn inline_part(asset: &ImageAsset) -> Value {
    json!({
        "inlineData": {
            "mimeType": asset.mime_type(),
            "data": asset.data(),
        }
    })
}

fn build_generate_payload(request: &ImageCallRequest) -> Value {
    let mut parts: Vec<Value> = request.attachments.iter().map(inline_part).collect();
    parts.push(json!({ "text": request.prompt }));
    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
            "seed": request.seed,
        },
    })
}

fn build_video_payload(request: &VideoCallRequest) -> Value {
    json!({
        "instances": [{
            "prompt": request.prompt,
            "image": {
                "bytesBase64Encoded": request.image.data(),
                "mimeType": request.image.mime_type(),
            },
        }],
        "parameters": {
            "aspectRatio": request.aspect_ratio,
            "durationSeconds": request.duration_seconds,
            "sampleCount": 1,
        },
    })
}

fn parse_generate_reply(body: &Value) -> RemoteReply {
    if let Some(reason) = body
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return RemoteReply::Blocked {
            reason: Some(reason.to_string()),
        };
    }

    let Some(candidate) = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        return RemoteReply::Blocked { reason: None };
    };

    let raw_parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut parts = Vec::new();
    for part in raw_parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            parts.push(ContentPart::Text(text.to_string()));
            continue;
        }
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        parts.push(ContentPart::InlineImage(ImageAsset::new(mime_type, data)));
    }

    if parts.is_empty() {
        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .filter(|reason| *reason != "STOP")
            .map(str::to_string);
        if finish_reason.is_some() {
            return RemoteReply::Blocked {
                reason: finish_reason,
            };
        }
    }
    RemoteReply::Content(parts)
}

fn parse_video_poll(body: &Value) -> Result<VideoPoll> {
    if !body.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(VideoPoll::Pending);
    }
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Veo operation failed: {message}");
    }
    let response = body.get("response");
    let samples = response
        .and_then(|value| value.get("generateVideoResponse"))
        .and_then(|value| value.get("generatedSamples"))
        .or_else(|| response.and_then(|value| value.get("generatedVideos")))
        .and_then(Value::as_array);
    let uri = samples
        .and_then(|rows| rows.first())
        .and_then(|sample| sample.get("video"))
        .and_then(|video| video.get("uri"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Ok(VideoPoll::Done { uri })
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout() || reqwest_err.is_connect())
            .unwrap_or(false)
    })
}

/// Drops the query string so credentials never reach logs or error text.
fn redact(url: &str) -> &str {
    url.split_once('?').map(|(head, _)| head).unwrap_or(url)
}
