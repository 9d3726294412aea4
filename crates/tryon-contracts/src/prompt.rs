//! Instruction text sent to the remote image and video models.
//!
//! The image prompt doubles as the error channel: the model is told to reply
//! with text starting with [`ERROR_SENTINEL`] instead of an image when it
//! cannot do the job, and the orchestrator looks for that prefix.

use crate::views::{AnimationType, QualityTier, VideoDuration, ViewLabel};

pub const ERROR_SENTINEL: &str = "ERROR:";

/// Aspect ratio requested for every video preview.
pub const VIDEO_ASPECT_RATIO: &str = "9:16";

pub const FULL_BODY_ADVISORY: &str =
    "For a more accurate full-body try-on, please provide an image that shows your entire body.";

pub const UNCLEAR_OUTFIT_MESSAGE: &str =
    "The provided outfit image is unclear. Please upload a higher-quality image for better results.";

pub const FIDELITY_MANDATE: &str = "**Outfit Fidelity:** Reproduce the outfit from the second image faithfully: keep its cut, colors, fabric, and construction exactly as designed. Do not alter, remove, or invent logos, prints, or patterns unless the additional instructions explicitly ask for it.";

pub const CONSISTENCY_MANDATE: &str = "**Consistency:** This image is one of four views (front, left side, right side, back) of the same try-on. Keep the person's identity, facial features, hairstyle, skin tone, body shape, and every outfit detail identical across all views generated with the same consistency seed.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOptions {
    pub view: ViewLabel,
    pub quality: QualityTier,
    pub has_style_reference: bool,
    pub instructions: String,
    pub seed: i64,
}

pub fn quality_preamble(quality: QualityTier) -> &'static str {
    match quality {
        QualityTier::Standard => {
            "Generate a high-quality, photorealistic image of the person from the first image wearing the outfit from the second image."
        }
        QualityTier::High => {
            "Generate a high-resolution, highly detailed, photorealistic image of the person from the first image wearing the outfit from the second image. The result must be indistinguishable from a real photograph."
        }
        QualityTier::Ultra => {
            "Generate an ultra-high-resolution, 4K, hyper-detailed photorealistic image of the person from the first image wearing the outfit from the second image, with crisp fabric micro-texture and studio-grade lighting. The result must be indistinguishable from professional photography."
        }
    }
}

pub fn build_view_prompt(options: &PromptOptions) -> String {
    let mut sections: Vec<String> = Vec::new();

    let role = if options.has_style_reference {
        "You are a virtual try-on assistant. The first image shows the person, the second image shows the outfit, and the third image is a style reference."
    } else {
        "You are a virtual try-on assistant. The first image shows the person and the second image shows the outfit."
    };
    sections.push(role.to_string());
    sections.push(quality_preamble(options.quality).to_string());
    sections.push(format!(
        "**View:** Generate a **{}** of the person.",
        options.view.label()
    ));

    if options.has_style_reference {
        sections.push(
            "**Style Reference:** Apply the texture, pattern, and color treatment of the third image to the outfit from the second image. The style only restyles the outfit; do not replace the outfit with the garment shown in the style image."
                .to_string(),
        );
    }

    let instructions = options.instructions.trim();
    if !instructions.is_empty() {
        sections.push(format!("**Additional Instructions:** {instructions}"));
    }

    sections.push(
        [
            "**Requirements:**",
            "- **Fit:** The outfit must be fitted naturally onto the user's body shape and posture.",
            "- **Realism:** Maintain realistic fabric textures, shadows, and lighting.",
            "- **Quality:** The final image must look like a real photograph, not a digital overlay or photoshop composite.",
            "- **Background:** Place the person in a simple, neutral, light-gray studio background, consistent across all generated views.",
        ]
        .join("\n"),
    );
    sections.push(FIDELITY_MANDATE.to_string());
    sections.push(CONSISTENCY_MANDATE.to_string());
    sections.push(format!("**Consistency Seed:** {}", options.seed));
    sections.push(format!(
        "**Error Handling:**\n- If the outfit in the second image is unclear or low-quality, respond with only the text: \"{ERROR_SENTINEL} {UNCLEAR_OUTFIT_MESSAGE}\"\n- If the person in the first image does not show a full body, generate the try-on for the visible parts of the body and in the text response, politely mention: \"{FULL_BODY_ADVISORY}\""
    ));

    sections.join("\n\n")
}

pub fn animation_clause(animation: AnimationType) -> &'static str {
    match animation {
        AnimationType::Turn360 => {
            "Animate the person in this image to perform a slow, smooth 360-degree turn, rotating fully in place so the outfit is shown from every angle."
        }
        AnimationType::SubtleSway => {
            "Animate the person in this image standing in place with a gentle, natural sway, shifting their weight subtly so the fabric of the outfit moves realistically."
        }
        AnimationType::CatwalkPose => {
            "Animate the person in this image walking toward the camera with a confident catwalk strut, then stopping to strike a pose that shows off the outfit."
        }
    }
}

pub fn build_video_prompt(
    animation: AnimationType,
    duration: VideoDuration,
    aspect_ratio: &str,
) -> String {
    format!(
        "{} It is crucial to maintain the person's appearance, the outfit they are wearing, and the neutral light-gray studio background. The video should be {} seconds long with a {} aspect ratio.",
        animation_clause(animation),
        duration.seconds(),
        aspect_ratio
    )
}

/// Returns the rejection message if `text` carries the error sentinel.
pub fn strip_error_sentinel(text: &str) -> Option<&str> {
    text.trim_start()
        .strip_prefix(ERROR_SENTINEL)
        .map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(view: ViewLabel) -> PromptOptions {
        PromptOptions {
            view,
            quality: QualityTier::Standard,
            has_style_reference: false,
            instructions: String::new(),
            seed: 42,
        }
    }

    #[test]
    fn four_views_differ_only_in_view_clause() {
        let prompts: Vec<String> = ViewLabel::ALL
            .iter()
            .map(|view| build_view_prompt(&options(*view)))
            .collect();
        for (view, prompt) in ViewLabel::ALL.iter().zip(&prompts) {
            assert!(prompt.contains(CONSISTENCY_MANDATE));
            assert!(prompt.contains(&format!("**{}**", view.label())));
            let normalized = prompt.replace(view.label(), "<VIEW>");
            let front = prompts[0].replace(ViewLabel::Front.label(), "<VIEW>");
            assert_eq!(normalized, front);
        }
    }

    #[test]
    fn quality_tiers_scale_wording() {
        let mut opts = options(ViewLabel::Front);
        assert!(build_view_prompt(&opts).contains("high-quality"));
        opts.quality = QualityTier::High;
        assert!(build_view_prompt(&opts).contains("indistinguishable from a real photograph"));
        opts.quality = QualityTier::Ultra;
        let ultra = build_view_prompt(&opts);
        assert!(ultra.contains("ultra-high-resolution"));
        assert!(ultra.contains("4K"));
        assert!(ultra.contains("indistinguishable from professional photography"));
    }

    #[test]
    fn style_clause_only_with_style_reference() {
        let mut opts = options(ViewLabel::Left);
        assert!(!build_view_prompt(&opts).contains("**Style Reference:**"));
        opts.has_style_reference = true;
        let prompt = build_view_prompt(&opts);
        assert!(prompt.contains("**Style Reference:**"));
        assert!(prompt.contains("do not replace the outfit"));
    }

    #[test]
    fn instructions_are_trimmed_and_blank_ones_skipped() {
        let mut opts = options(ViewLabel::Back);
        opts.instructions = "   ".to_string();
        assert!(!build_view_prompt(&opts).contains("Additional Instructions"));
        opts.instructions = "  roll up the sleeves \n".to_string();
        assert!(build_view_prompt(&opts)
            .contains("**Additional Instructions:** roll up the sleeves\n\n"));
    }

    #[test]
    fn error_instructions_use_sentinel() {
        let prompt = build_view_prompt(&options(ViewLabel::Right));
        assert!(prompt.contains(&format!("\"{ERROR_SENTINEL} {UNCLEAR_OUTFIT_MESSAGE}\"")));
        assert!(prompt.contains(FULL_BODY_ADVISORY));
        assert!(prompt.contains(FIDELITY_MANDATE));
    }

    #[test]
    fn sentinel_is_stripped_with_following_space() {
        assert_eq!(strip_error_sentinel("ERROR: blurry outfit"), Some("blurry outfit"));
        assert_eq!(strip_error_sentinel("ERROR:blurry"), Some("blurry"));
        assert_eq!(strip_error_sentinel("Looks good"), None);
    }

    #[test]
    fn video_prompt_carries_animation_duration_and_ratio() {
        let prompt = build_video_prompt(
            AnimationType::CatwalkPose,
            VideoDuration::Eight,
            VIDEO_ASPECT_RATIO,
        );
        assert!(prompt.starts_with(animation_clause(AnimationType::CatwalkPose)));
        assert!(prompt.contains("8 seconds"));
        assert!(prompt.contains("9:16"));
    }
}
