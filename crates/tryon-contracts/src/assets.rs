use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::error::TryOnError;

/// Media type every normalized asset carries.
pub const CANONICAL_MIME: &str = "image/png";

/// An encoded bitmap: media type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    mime_type: String,
    data: String,
}

impl ImageAsset {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64.encode(bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(raw: &str) -> Result<Self, TryOnError> {
        let rest = raw
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| TryOnError::InvalidInput("not a data URL".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| TryOnError::InvalidInput("data URL has no payload".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| TryOnError::InvalidInput("data URL is not base64".to_string()))?;
        if mime_type.is_empty() {
            return Err(TryOnError::InvalidInput(
                "data URL has no media type".to_string(),
            ));
        }
        Ok(Self::new(mime_type, payload))
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Base64 payload without the data URL header.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, TryOnError> {
        BASE64
            .decode(self.data.as_bytes())
            .map_err(|err| TryOnError::DecodeError(format!("invalid base64 payload: {err}")))
    }
}

/// Re-encodes an uploaded file into the canonical PNG representation.
///
/// The original container format is discarded, so downstream calls only ever
/// see one encoding. Running the result through again yields the same asset.
pub fn normalize_image(bytes: &[u8], declared_mime: &str) -> Result<ImageAsset, TryOnError> {
    let declared = declared_mime.trim().to_ascii_lowercase();
    if !declared.starts_with("image/") {
        return Err(TryOnError::InvalidInput(format!(
            "expected an image file, got '{}'",
            declared_mime.trim()
        )));
    }

    let decoded =
        image::load_from_memory(bytes).map_err(|err| TryOnError::DecodeError(err.to_string()))?;

    let mut encoded = Cursor::new(Vec::new());
    decoded
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|err| TryOnError::EncodeError(err.to_string()))?;

    Ok(ImageAsset::from_bytes(CANONICAL_MIME, encoded.get_ref()))
}

/// Normalizes an asset that is already in memory (e.g. a model output).
pub fn normalize_asset(asset: &ImageAsset) -> Result<ImageAsset, TryOnError> {
    let bytes = asset.decode_bytes()?;
    normalize_image(&bytes, asset.mime_type())
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("mp4") {
        return "mp4";
    }
    if lowered.contains("webm") {
        return "webm";
    }
    "png"
}
