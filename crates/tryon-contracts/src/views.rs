use std::fmt;

use serde::{Deserialize, Serialize};

/// Camera angle requested for one generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewLabel {
    Front,
    Left,
    Right,
    Back,
}

impl ViewLabel {
    /// Canonical order; results are always reported in this order.
    pub const ALL: [ViewLabel; 4] = [
        ViewLabel::Front,
        ViewLabel::Left,
        ViewLabel::Right,
        ViewLabel::Back,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Front => "Front view",
            Self::Left => "Left side view",
            Self::Right => "Right side view",
            Self::Back => "Back view",
        }
    }

    /// File-name friendly slug.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Left => "left",
            Self::Right => "right",
            Self::Back => "back",
        }
    }
}

impl fmt::Display for ViewLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Standard,
    High,
    Ultra,
}

impl QualityTier {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "high" => Some(Self::High),
            "ultra" => Some(Self::Ultra),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnimationType {
    #[default]
    #[serde(rename = "360-turn")]
    Turn360,
    SubtleSway,
    CatwalkPose,
}

impl AnimationType {
    /// Unrecognized or empty values fall back to the 360 turn.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw
            .trim()
            .to_ascii_lowercase()
            .replace(['_', ' '], "-")
            .as_str()
        {
            "subtle-sway" | "sway" => Self::SubtleSway,
            "catwalk-pose" | "catwalk" => Self::CatwalkPose,
            _ => Self::Turn360,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Turn360 => "360-turn",
            Self::SubtleSway => "subtle-sway",
            Self::CatwalkPose => "catwalk-pose",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoDuration {
    #[default]
    Five,
    Eight,
    Ten,
}

impl VideoDuration {
    pub fn from_seconds(seconds: u64) -> Option<Self> {
        match seconds {
            5 => Some(Self::Five),
            8 => Some(Self::Eight),
            10 => Some(Self::Ten),
            _ => None,
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            Self::Five => 5,
            Self::Eight => 8,
            Self::Ten => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnimationType, QualityTier, VideoDuration, ViewLabel};

    #[test]
    fn views_are_in_canonical_order() {
        let labels: Vec<&str> = ViewLabel::ALL.iter().map(|view| view.label()).collect();
        assert_eq!(
            labels,
            vec!["Front view", "Left side view", "Right side view", "Back view"]
        );
    }

    #[test]
    fn animation_parse_defaults_to_turn() {
        assert_eq!(AnimationType::parse_or_default("Subtle Sway"), AnimationType::SubtleSway);
        assert_eq!(AnimationType::parse_or_default("catwalk_pose"), AnimationType::CatwalkPose);
        assert_eq!(AnimationType::parse_or_default("moonwalk"), AnimationType::Turn360);
        assert_eq!(AnimationType::parse_or_default(""), AnimationType::Turn360);
    }

    #[test]
    fn duration_accepts_only_supported_lengths() {
        assert_eq!(VideoDuration::from_seconds(8), Some(VideoDuration::Eight));
        assert_eq!(VideoDuration::from_seconds(7), None);
        assert_eq!(VideoDuration::Ten.seconds(), 10);
    }

    #[test]
    fn quality_parse_is_case_insensitive() {
        assert_eq!(QualityTier::parse(" ULTRA "), Some(QualityTier::Ultra));
        assert_eq!(QualityTier::parse("medium"), None);
    }
}
