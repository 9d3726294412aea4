use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::Rng;
use tryon_contracts::assets::extension_for_mime;
use tryon_contracts::{
    AnimationType, EventLog, GeneratedImage, ImageAsset, QualityTier, ResultGroup,
    ResultGroupId, TryOnError, TryOnEvent, VideoDuration, VideoState,
};

use crate::backend::GenerativeBackend;
use crate::batch::{BatchInput, BatchRunner, GroupIdSequence};
use crate::emit_event;
use crate::orchestrator::ViewAggregation;
use crate::video::{self, CancelToken, PollSettings, VideoMedia};

/// Proof that a video request was started for a group in a given session
/// epoch. Tickets issued before a [`TryOnSession::reset`] or a new
/// [`TryOnSession::generate`] are ignored when they are finished.
#[derive(Debug, Clone)]
pub struct VideoTicket {
    group_id: ResultGroupId,
    epoch: u64,
    front_view: GeneratedImage,
}

impl VideoTicket {
    pub fn group_id(&self) -> &ResultGroupId {
        &self.group_id
    }

    pub fn front_view(&self) -> &GeneratedImage {
        &self.front_view
    }
}

/// Inputs, results and page-level error of one try-on session.
pub struct TryOnSession {
    person: Option<ImageAsset>,
    outfits: Vec<ImageAsset>,
    styles: Vec<ImageAsset>,
    instructions: String,
    quality: QualityTier,
    aggregation: ViewAggregation,
    groups: Vec<ResultGroup>,
    error: Option<String>,
    epoch: u64,
    ids: GroupIdSequence,
    media_dir: PathBuf,
    events: Option<EventLog>,
}

impl TryOnSession {
    /// `media_dir` receives downloaded videos; it is created on first use.
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            person: None,
            outfits: Vec::new(),
            styles: Vec::new(),
            instructions: String::new(),
            quality: QualityTier::default(),
            aggregation: ViewAggregation::default(),
            groups: Vec::new(),
            error: None,
            epoch: 0,
            ids: GroupIdSequence::default(),
            media_dir: media_dir.into(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        emit_event(
            Some(&events),
            TryOnEvent::SessionStarted {
                media_dir: self.media_dir.clone(),
            },
        );
        self.events = Some(events);
        self
    }

    pub fn set_person(&mut self, person: Option<ImageAsset>) {
        self.person = person;
    }

    pub fn set_outfit(&mut self, outfit: Option<ImageAsset>) {
        self.outfits = outfit.into_iter().collect();
    }

    pub fn set_outfits(&mut self, outfits: Vec<ImageAsset>) {
        self.outfits = outfits;
    }

    pub fn set_style(&mut self, style: Option<ImageAsset>) {
        self.styles = style.into_iter().collect();
    }

    pub fn set_styles(&mut self, styles: Vec<ImageAsset>) {
        self.styles = styles;
    }

    pub fn set_instructions(&mut self, instructions: impl Into<String>) {
        self.instructions = instructions.into();
    }

    pub fn set_quality(&mut self, quality: QualityTier) {
        self.quality = quality;
    }

    pub fn set_aggregation(&mut self, aggregation: ViewAggregation) {
        self.aggregation = aggregation;
    }

    pub fn groups(&self) -> &[ResultGroup] {
        &self.groups
    }

    pub fn group(&self, id: &ResultGroupId) -> Option<&ResultGroup> {
        self.groups.iter().find(|group| &group.id == id)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn events(&self) -> Option<&EventLog> {
        self.events.as_ref()
    }

    pub fn generate<B, R>(&mut self, backend: &B, rng: &mut R) -> Result<&[ResultGroup], TryOnError>
    where
        B: GenerativeBackend + ?Sized,
        R: Rng,
    {
        self.generate_with(backend, rng, |_| {})
    }

    /// Replaces previous results with a fresh batch. `on_group` sees each
    /// group as soon as it has been stored. Outstanding video tickets become
    /// stale.
    pub fn generate_with<B, R, F>(
        &mut self,
        backend: &B,
        rng: &mut R,
        mut on_group: F,
    ) -> Result<&[ResultGroup], TryOnError>
    where
        B: GenerativeBackend + ?Sized,
        R: Rng,
        F: FnMut(&ResultGroup),
    {
        self.groups.clear();
        self.error = None;
        self.epoch += 1;

        let input = BatchInput {
            person: self.person.clone(),
            outfits: self.outfits.clone(),
            styles: self.styles.clone(),
            instructions: self.instructions.clone(),
            quality: self.quality,
            aggregation: self.aggregation,
        };
        let runner = BatchRunner::new(backend).with_events(self.events.as_ref());
        let groups = &mut self.groups;
        let outcome = runner.run(&input, &mut self.ids, rng, |group| {
            groups.push(group.clone());
            on_group(group);
        });

        match outcome {
            Ok(outcome) => {
                self.error = outcome.error_text();
                Ok(&self.groups)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Clears inputs and results. Video tickets issued earlier become stale.
    pub fn reset(&mut self) {
        self.person = None;
        self.outfits.clear();
        self.styles.clear();
        self.instructions.clear();
        self.quality = QualityTier::default();
        self.groups.clear();
        self.error = None;
        self.epoch += 1;
        emit_event(
            self.events.as_ref(),
            TryOnEvent::SessionReset { epoch: self.epoch },
        );
    }

    /// Marks the group's video as loading and hands out a ticket carrying
    /// its front view.
    pub fn begin_video(&mut self, id: &ResultGroupId) -> Result<VideoTicket, TryOnError> {
        let epoch = self.epoch;
        let group = self
            .groups
            .iter_mut()
            .find(|group| &group.id == id)
            .ok_or_else(|| TryOnError::UnknownResultGroup(id.to_string()))?;
        if group.is_video_loading() {
            return Err(TryOnError::VideoAlreadyLoading(id.to_string()));
        }
        let Some(front_view) = group.front_view().cloned() else {
            let err = TryOnError::MissingFrontView;
            group.video = VideoState::Failed {
                message: err.to_string(),
            };
            return Err(err);
        };
        group.video = VideoState::Loading;
        Ok(VideoTicket {
            group_id: id.clone(),
            epoch,
            front_view,
        })
    }

    /// Stores the outcome of a video request on its group. Returns the new
    /// video state, or `None` when the ticket is stale or its group is gone.
    pub fn finish_video(
        &mut self,
        ticket: VideoTicket,
        result: Result<VideoMedia, TryOnError>,
    ) -> Option<VideoState> {
        let id = ticket.group_id.clone();
        self.settle_video(ticket, result)?;
        self.group(&id).map(|group| group.video.clone())
    }

    /// Generates a video for one group and returns the stored media path.
    pub fn request_video<B>(
        &mut self,
        backend: &B,
        id: &ResultGroupId,
        duration: VideoDuration,
        animation: AnimationType,
        settings: &PollSettings,
        cancel: &CancelToken,
    ) -> Result<PathBuf, TryOnError>
    where
        B: GenerativeBackend + ?Sized,
    {
        let ticket = self.begin_video(id)?;
        let result = video::request_video(
            backend,
            ticket.front_view(),
            duration,
            animation,
            settings,
            cancel,
            self.events.as_ref(),
        );
        self.settle_video(ticket, result)
            .unwrap_or_else(|| Err(TryOnError::UnknownResultGroup(id.to_string())))
    }

    /// Nothing is written, recorded or emitted for a stale ticket.
    fn settle_video(
        &mut self,
        ticket: VideoTicket,
        result: Result<VideoMedia, TryOnError>,
    ) -> Option<Result<PathBuf, TryOnError>> {
        if ticket.epoch != self.epoch {
            tracing::debug!(group = %ticket.group_id, "discarding stale video result");
            return None;
        }
        let Some(index) = self.groups.iter().position(|group| group.id == ticket.group_id) else {
            tracing::debug!(group = %ticket.group_id, "video result for a removed group");
            return None;
        };

        let outcome = result.and_then(|media| {
            self.store_media(&ticket.group_id, &media)
                .map_err(|err| TryOnError::Unexpected(format!("{err:#}")))
        });
        let state = match &outcome {
            Ok(path) => VideoState::Ready { path: path.clone() },
            Err(err) => VideoState::Failed {
                message: err.to_string(),
            },
        };
        emit_event(
            self.events.as_ref(),
            TryOnEvent::VideoFinished {
                group_id: ticket.group_id,
                video: state.clone(),
            },
        );
        self.groups[index].video = state;
        Some(outcome)
    }

    fn store_media(&self, id: &ResultGroupId, media: &VideoMedia) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.media_dir)
            .with_context(|| format!("failed to create {}", self.media_dir.display()))?;
        let path = self
            .media_dir
            .join(format!("{}.{}", id, extension_for_mime(&media.mime_type)));
        fs::write(&path, &media.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
