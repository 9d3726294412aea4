//! Fans one combination out into four concurrent view calls and folds the
//! replies back into a single labeled view set.

use std::thread;

use tryon_contracts::prompt::{build_view_prompt, strip_error_sentinel, PromptOptions};
use tryon_contracts::{
    GeneratedImage, ImageAsset, MissingView, QualityTier, TryOnError, ViewLabel,
};

use crate::backend::{
    error_chain_text, ContentPart, GenerativeBackend, ImageCallRequest, RemoteReply,
};

/// What to do with a combination when only some of its views succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewAggregation {
    /// Any failed view fails the whole combination.
    #[default]
    AllOrNothing,
    /// Keep the views that succeeded and record the gaps; the combination
    /// only fails when every view failed.
    Partial,
}

#[derive(Debug, Clone)]
pub struct CombinationRequest {
    pub person: ImageAsset,
    pub outfit: ImageAsset,
    pub style: Option<ImageAsset>,
    pub instructions: String,
    pub quality: QualityTier,
    pub seed: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ViewSet {
    pub views: Vec<GeneratedImage>,
    pub note: Option<String>,
    pub missing: Vec<MissingView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewOutcome {
    image: ImageAsset,
    note: Option<String>,
}

pub fn generate_views<B>(
    backend: &B,
    request: &CombinationRequest,
    aggregation: ViewAggregation,
) -> Result<ViewSet, TryOnError>
where
    B: GenerativeBackend + ?Sized,
{
    let mut attachments = vec![request.person.clone(), request.outfit.clone()];
    if let Some(style) = &request.style {
        attachments.push(style.clone());
    }

    let outcomes: Vec<(ViewLabel, Result<ViewOutcome, TryOnError>)> = thread::scope(|scope| {
        let handles: Vec<_> = ViewLabel::ALL
            .iter()
            .map(|&view| {
                let call = ImageCallRequest {
                    attachments: attachments.clone(),
                    prompt: build_view_prompt(&PromptOptions {
                        view,
                        quality: request.quality,
                        has_style_reference: request.style.is_some(),
                        instructions: request.instructions.clone(),
                        seed: request.seed,
                    }),
                    seed: request.seed,
                };
                (view, scope.spawn(move || generate_one(backend, view, &call)))
            })
            .collect();

        handles
            .into_iter()
            .map(|(view, handle)| {
                let outcome = handle.join().unwrap_or_else(|_| {
                    Err(TryOnError::Unexpected(format!(
                        "the {view} request worker panicked"
                    )))
                });
                (view, outcome)
            })
            .collect()
    });

    aggregate(outcomes, aggregation)
}

fn generate_one<B>(
    backend: &B,
    view: ViewLabel,
    call: &ImageCallRequest,
) -> Result<ViewOutcome, TryOnError>
where
    B: GenerativeBackend + ?Sized,
{
    let reply = backend.generate_image(call).map_err(|err| {
        tracing::warn!(%view, error = %error_chain_text(&err, 512), "view request failed");
        TryOnError::Unexpected(format!(
            "Failed to generate the {view}: {}",
            error_chain_text(&err, 512)
        ))
    })?;
    classify_reply(view, reply)
}

fn classify_reply(view: ViewLabel, reply: RemoteReply) -> Result<ViewOutcome, TryOnError> {
    let parts = match reply {
        RemoteReply::Blocked { reason } => return Err(TryOnError::Blocked { reason }),
        RemoteReply::Content(parts) => parts,
    };

    let mut image = None;
    let mut note = None;
    for part in parts {
        match part {
            ContentPart::Text(text) => {
                if let Some(message) = strip_error_sentinel(&text) {
                    return Err(TryOnError::ContentRejected(message.to_string()));
                }
                let trimmed = text.trim();
                if note.is_none() && !trimmed.is_empty() {
                    note = Some(trimmed.to_string());
                }
            }
            ContentPart::InlineImage(asset) => {
                if image.is_none() {
                    image = Some(asset);
                }
            }
        }
    }

    match image {
        Some(image) => Ok(ViewOutcome { image, note }),
        None => Err(TryOnError::NoImageReturned { view }),
    }
}

/// Outcomes arrive in canonical view order; so do the reported views.
fn aggregate(
    outcomes: Vec<(ViewLabel, Result<ViewOutcome, TryOnError>)>,
    aggregation: ViewAggregation,
) -> Result<ViewSet, TryOnError> {
    let mut set = ViewSet::default();
    let mut first_error = None;

    for (view, outcome) in outcomes {
        match outcome {
            Ok(ViewOutcome { image, note }) => {
                if set.note.is_none() {
                    set.note = note;
                }
                set.views.push(GeneratedImage::new(view, image));
            }
            Err(err) => {
                if aggregation == ViewAggregation::AllOrNothing {
                    return Err(err);
                }
                set.missing.push(MissingView {
                    label: view,
                    message: err.to_string(),
                });
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) if set.views.is_empty() => Err(err),
        _ => Ok(set),
    }
}
