use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::assets::ImageAsset;
use crate::views::ViewLabel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub src: ImageAsset,
    pub alt: String,
    pub label: ViewLabel,
}

impl GeneratedImage {
    pub fn new(label: ViewLabel, src: ImageAsset) -> Self {
        Self {
            alt: format!("{} view", label.label()),
            src,
            label,
        }
    }
}

/// A view that failed inside a combination kept under partial aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingView {
    pub label: ViewLabel,
    pub message: String,
}

/// Identifier of a result group.
///
/// Combines a per-session sequence number with a digest of the outfit and
/// style payloads, so re-running the same combination yields distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultGroupId(String);

impl ResultGroupId {
    pub fn derive(sequence: u64, outfit: &ImageAsset, style: Option<&ImageAsset>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(outfit.data().as_bytes());
        if let Some(style) = style {
            hasher.update(b"|");
            hasher.update(style.data().as_bytes());
        }
        let digest = hasher.finalize();
        Self(format!("rg-{:04}-{}", sequence, hex::encode(&digest[..4])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of the optional video preview attached to a result group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoState {
    #[default]
    Idle,
    Loading,
    Ready { path: PathBuf },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGroup {
    pub id: ResultGroupId,
    pub outfit_image: ImageAsset,
    pub style_image: Option<ImageAsset>,
    pub views: Vec<GeneratedImage>,
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_views: Vec<MissingView>,
    #[serde(default)]
    pub video: VideoState,
}

impl ResultGroup {
    pub fn view(&self, label: ViewLabel) -> Option<&GeneratedImage> {
        self.views.iter().find(|image| image.label == label)
    }

    pub fn front_view(&self) -> Option<&GeneratedImage> {
        self.view(ViewLabel::Front)
    }

    pub fn video_url(&self) -> Option<&Path> {
        match &self.video {
            VideoState::Ready { path } => Some(path.as_path()),
            _ => None,
        }
    }

    pub fn video_error(&self) -> Option<&str> {
        match &self.video {
            VideoState::Failed { message } => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn is_video_loading(&self) -> bool {
        matches!(self.video, VideoState::Loading)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn asset(data: &str) -> ImageAsset {
        ImageAsset::new("image/png", data)
    }

    #[test]
    fn ids_differ_for_same_combination_at_different_sequence() {
        let outfit = asset("AAAAsameTail");
        let first = ResultGroupId::derive(1, &outfit, None);
        let second = ResultGroupId::derive(2, &outfit, None);
        assert_ne!(first, second);
        assert!(first.as_str().starts_with("rg-0001-"));
    }

    #[test]
    fn ids_do_not_collide_on_shared_suffix() {
        let a = ResultGroupId::derive(1, &asset("xxxxTAIL"), None);
        let b = ResultGroupId::derive(1, &asset("yyyyTAIL"), None);
        assert_ne!(a, b);
        let with_style = ResultGroupId::derive(1, &asset("xxxxTAIL"), Some(&asset("s")));
        assert_ne!(a, with_style);
    }

    #[test]
    fn generated_image_alt_follows_label() {
        let image = GeneratedImage::new(ViewLabel::Left, asset("x"));
        assert_eq!(image.alt, "Left side view view");
        assert_eq!(GeneratedImage::new(ViewLabel::Back, asset("x")).alt, "Back view view");
    }

    #[test]
    fn video_accessors_follow_state() {
        let mut group = ResultGroup {
            id: ResultGroupId::derive(1, &asset("o"), None),
            outfit_image: asset("o"),
            style_image: None,
            views: vec![GeneratedImage::new(ViewLabel::Front, asset("f"))],
            info: None,
            missing_views: Vec::new(),
            video: VideoState::Idle,
        };
        assert!(group.front_view().is_some());
        assert!(!group.is_video_loading());
        group.video = VideoState::Loading;
        assert!(group.is_video_loading());
        group.video = VideoState::Ready {
            path: PathBuf::from("/tmp/v.mp4"),
        };
        assert_eq!(group.video_url(), Some(PathBuf::from("/tmp/v.mp4").as_path()));
        group.video = VideoState::Failed {
            message: "boom".to_string(),
        };
        assert_eq!(group.video_error(), Some("boom"));
        assert_eq!(group.video_url(), None);
    }
}
