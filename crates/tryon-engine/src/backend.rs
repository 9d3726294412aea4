use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tryon_contracts::assets::CANONICAL_MIME;
use tryon_contracts::ImageAsset;

/// One image-generation call: a single view of a single combination.
#[derive(Debug, Clone)]
pub struct ImageCallRequest {
    /// Person, outfit, then the optional style image.
    pub attachments: Vec<ImageAsset>,
    pub prompt: String,
    pub seed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineImage(ImageAsset),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    /// No candidates, or the request was refused before generation.
    Blocked { reason: Option<String> },
    Content(Vec<ContentPart>),
}

#[derive(Debug, Clone)]
pub struct VideoCallRequest {
    pub image: ImageAsset,
    pub prompt: String,
    pub aspect_ratio: String,
    pub duration_seconds: u64,
}

/// Server-side handle of a long-running video generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoPoll {
    Pending,
    Done { uri: Option<String> },
}

#[derive(Debug, Clone)]
pub struct MediaDownload {
    pub status: u16,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaDownload {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Remote generative service. Implementations must be shareable across the
/// threads that carry a combination's concurrent view calls.
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate_image(&self, request: &ImageCallRequest) -> Result<RemoteReply>;
    fn start_video(&self, request: &VideoCallRequest) -> Result<VideoOperation>;
    fn poll_video(&self, operation: &VideoOperation) -> Result<VideoPoll>;
    fn download_media(&self, uri: &str) -> Result<MediaDownload>;
}

/// Offline backend: answers every view with a solid-colour PNG derived from
/// the prompt and seed, and every video request with a tiny stub payload.
#[derive(Debug, Clone)]
pub struct DryrunBackend {
    width: u32,
    height: u32,
}

impl Default for DryrunBackend {
    fn default() -> Self {
        Self {
            width: 96,
            height: 128,
        }
    }
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GenerativeBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_image(&self, request: &ImageCallRequest) -> Result<RemoteReply> {
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed as u64);
        let mut image = RgbImage::new(self.width, self.height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut encoded = Cursor::new(Vec::new());
        image
            .write_to(&mut encoded, ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(RemoteReply::Content(vec![ContentPart::InlineImage(
            ImageAsset::from_bytes(CANONICAL_MIME, encoded.get_ref()),
        )]))
    }

    fn start_video(&self, request: &VideoCallRequest) -> Result<VideoOperation> {
        let (r, g, b) = color_from_prompt(&request.prompt, request.duration_seconds);
        Ok(VideoOperation {
            name: format!("operations/dryrun-{r:02x}{g:02x}{b:02x}"),
        })
    }

    fn poll_video(&self, operation: &VideoOperation) -> Result<VideoPoll> {
        Ok(VideoPoll::Done {
            uri: Some(format!("dryrun://{}", operation.name)),
        })
    }

    fn download_media(&self, uri: &str) -> Result<MediaDownload> {
        Ok(MediaDownload {
            status: 200,
            mime_type: Some("video/mp4".to_string()),
            bytes: format!("dryrun video for {uri}").into_bytes(),
        })
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

/// Flattens an error and its causes into one line, skipping repeats.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dryrun_returns_png_image_part() -> anyhow::Result<()> {
        let backend = DryrunBackend::new();
        let reply = backend.generate_image(&ImageCallRequest {
            attachments: Vec::new(),
            prompt: "front".to_string(),
            seed: 7,
        })?;
        let RemoteReply::Content(parts) = reply else {
            panic!("dryrun should never block");
        };
        let [ContentPart::InlineImage(asset)] = parts.as_slice() else {
            panic!("expected a single image part");
        };
        assert_eq!(asset.mime_type(), "image/png");
        let bytes = asset.decode_bytes()?;
        assert_eq!(image::guess_format(&bytes)?, ImageFormat::Png);
        Ok(())
    }

    #[test]
    fn dryrun_video_round_trip_completes_immediately() -> anyhow::Result<()> {
        let backend = DryrunBackend::new();
        let operation = backend.start_video(&VideoCallRequest {
            image: ImageAsset::new("image/png", "AA=="),
            prompt: "turn".to_string(),
            aspect_ratio: "9:16".to_string(),
            duration_seconds: 5,
        })?;
        let VideoPoll::Done { uri: Some(uri) } = backend.poll_video(&operation)? else {
            panic!("dryrun operation should be done");
        };
        let media = backend.download_media(&uri)?;
        assert!(media.is_success());
        assert!(!media.bytes.is_empty());
        Ok(())
    }

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("generateContent request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "generateContent request failed | caused by: connection reset"
        );
        assert_eq!(error_chain_text(&err, 10), "generateCo…");
    }

    #[test]
    fn media_status_range_is_success() {
        let media = MediaDownload {
            status: 404,
            mime_type: None,
            bytes: Vec::new(),
        };
        assert!(!media.is_success());
    }
}
