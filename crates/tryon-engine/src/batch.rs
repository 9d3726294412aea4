use rand::Rng;
use tryon_contracts::{
    EventLog, ImageAsset, QualityTier, ResultGroup, ResultGroupId, TryOnError, TryOnEvent,
    VideoState,
};

use crate::backend::GenerativeBackend;
use crate::emit_event;
use crate::orchestrator::{generate_views, CombinationRequest, ViewAggregation};

pub const MISSING_INPUT_MESSAGE: &str = "Please upload both your photo and an outfit image.";

#[derive(Debug, Clone, Default)]
pub struct BatchInput {
    pub person: Option<ImageAsset>,
    pub outfits: Vec<ImageAsset>,
    pub styles: Vec<ImageAsset>,
    pub instructions: String,
    pub quality: QualityTier,
    pub aggregation: ViewAggregation,
}

/// One (outfit, optional style) pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub outfit_index: usize,
    pub style_index: Option<usize>,
    pub outfit: ImageAsset,
    pub style: Option<ImageAsset>,
}

/// Outfit-major, style-minor cross product; one style-less combination per
/// outfit when no styles were supplied.
pub fn build_combinations(outfits: &[ImageAsset], styles: &[ImageAsset]) -> Vec<Combination> {
    let mut out = Vec::with_capacity(outfits.len() * styles.len().max(1));
    for (outfit_index, outfit) in outfits.iter().enumerate() {
        if styles.is_empty() {
            out.push(Combination {
                outfit_index,
                style_index: None,
                outfit: outfit.clone(),
                style: None,
            });
            continue;
        }
        for (style_index, style) in styles.iter().enumerate() {
            out.push(Combination {
                outfit_index,
                style_index: Some(style_index),
                outfit: outfit.clone(),
                style: Some(style.clone()),
            });
        }
    }
    out
}

/// Hands out result-group ids; never rewinds, even across session resets.
#[derive(Debug, Default)]
pub struct GroupIdSequence {
    last: u64,
}

impl GroupIdSequence {
    pub fn next_id(&mut self, outfit: &ImageAsset, style: Option<&ImageAsset>) -> ResultGroupId {
        self.last += 1;
        ResultGroupId::derive(self.last, outfit, style)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub groups: Vec<ResultGroup>,
    pub errors: Vec<String>,
    pub attempted: usize,
}

impl BatchOutcome {
    /// Newline-joined failure messages, `None` when every combination worked.
    pub fn error_text(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(self.errors.join("\n"))
    }
}

/// Drives the orchestrator over every combination, one at a time.
pub struct BatchRunner<'a, B: GenerativeBackend + ?Sized> {
    backend: &'a B,
    events: Option<&'a EventLog>,
}

impl<'a, B: GenerativeBackend + ?Sized> BatchRunner<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Runs the batch. `on_group` sees each result group as soon as its
    /// combination resolves, before the next combination starts.
    pub fn run<R, F>(
        &self,
        input: &BatchInput,
        ids: &mut GroupIdSequence,
        rng: &mut R,
        mut on_group: F,
    ) -> Result<BatchOutcome, TryOnError>
    where
        R: Rng,
        F: FnMut(&ResultGroup),
    {
        let Some(person) = input.person.as_ref() else {
            return Err(TryOnError::MissingInput(MISSING_INPUT_MESSAGE.to_string()));
        };
        if input.outfits.is_empty() {
            return Err(TryOnError::MissingInput(MISSING_INPUT_MESSAGE.to_string()));
        }

        let combinations = build_combinations(&input.outfits, &input.styles);
        tracing::info!(
            combinations = combinations.len(),
            backend = self.backend.name(),
            quality = input.quality.as_str(),
            "starting try-on batch"
        );
        emit_event(
            self.events,
            TryOnEvent::BatchStarted {
                combinations: combinations.len(),
                outfits: input.outfits.len(),
                styles: input.styles.len(),
                quality: input.quality,
                backend: self.backend.name().to_string(),
            },
        );

        let mut outcome = BatchOutcome::default();
        for (index, combination) in combinations.into_iter().enumerate() {
            let seed = rng.gen_range(0..=i32::MAX) as i64;
            outcome.attempted += 1;
            emit_event(
                self.events,
                TryOnEvent::CombinationStarted {
                    index,
                    outfit_index: combination.outfit_index,
                    style_index: combination.style_index,
                    seed,
                },
            );

            let request = CombinationRequest {
                person: person.clone(),
                outfit: combination.outfit,
                style: combination.style,
                instructions: input.instructions.clone(),
                quality: input.quality,
                seed,
            };
            match generate_views(self.backend, &request, input.aggregation) {
                Ok(set) => {
                    let group = ResultGroup {
                        id: ids.next_id(&request.outfit, request.style.as_ref()),
                        outfit_image: request.outfit,
                        style_image: request.style,
                        views: set.views,
                        info: set.note,
                        missing_views: set.missing,
                        video: VideoState::Idle,
                    };
                    tracing::info!(
                        index,
                        group = %group.id,
                        views = group.views.len(),
                        "combination succeeded"
                    );
                    emit_event(
                        self.events,
                        TryOnEvent::ResultGroupCreated {
                            index,
                            group_id: group.id.clone(),
                            views: group.views.len(),
                            missing_views: group.missing_views.len(),
                        },
                    );
                    on_group(&group);
                    outcome.groups.push(group);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "combination failed");
                    emit_event(
                        self.events,
                        TryOnEvent::CombinationFailed {
                            index,
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        },
                    );
                    outcome.errors.push(err.to_string());
                }
            }
        }

        emit_event(
            self.events,
            TryOnEvent::BatchFinished {
                attempted: outcome.attempted,
                succeeded: outcome.groups.len(),
                failed: outcome.errors.len(),
            },
        );
        Ok(outcome)
    }
}

/// One-shot batch with its own id sequence and no event log.
pub fn run_batch<B, R, F>(
    backend: &B,
    input: &BatchInput,
    rng: &mut R,
    on_group: F,
) -> Result<BatchOutcome, TryOnError>
where
    B: GenerativeBackend + ?Sized,
    R: Rng,
    F: FnMut(&ResultGroup),
{
    BatchRunner::new(backend).run(input, &mut GroupIdSequence::default(), rng, on_group)
}
