//! Video preview generation: one long-running remote operation per request,
//! polled until it completes, times out, or is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tryon_contracts::prompt::{build_video_prompt, VIDEO_ASPECT_RATIO};
use tryon_contracts::{
    AnimationType, EventLog, GeneratedImage, TryOnError, TryOnEvent, VideoDuration, ViewLabel,
};

use crate::backend::{
    error_chain_text, GenerativeBackend, VideoCallRequest, VideoOperation, VideoPoll,
};
use crate::emit_event;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared flag that stops a video wait at its next check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` waits for as long as the remote side takes.
    pub deadline: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoJobState {
    Submitted,
    Polling { polls: u32 },
    Completed { uri: Option<String> },
    TimedOut,
    Cancelled,
}

impl VideoJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::TimedOut | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct VideoMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A submitted remote video operation and its local poll state.
pub struct VideoJob<'a, B: GenerativeBackend + ?Sized> {
    backend: &'a B,
    operation: VideoOperation,
    settings: PollSettings,
    cancel: CancelToken,
    started: Instant,
    state: VideoJobState,
    events: Option<&'a EventLog>,
}

impl<'a, B: GenerativeBackend + ?Sized> VideoJob<'a, B> {
    pub fn submit(
        backend: &'a B,
        request: &VideoCallRequest,
        settings: PollSettings,
        cancel: CancelToken,
    ) -> Result<Self, TryOnError> {
        if cancel.is_cancelled() {
            return Err(TryOnError::Cancelled);
        }
        let operation = backend.start_video(request).map_err(unexpected)?;
        tracing::info!(operation = %operation.name, "video operation submitted");
        Ok(Self {
            backend,
            operation,
            settings,
            cancel,
            started: Instant::now(),
            state: VideoJobState::Submitted,
            events: None,
        })
    }

    pub fn with_events(mut self, events: Option<&'a EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn operation(&self) -> &VideoOperation {
        &self.operation
    }

    pub fn state(&self) -> &VideoJobState {
        &self.state
    }

    /// Checks cancellation and the deadline, then polls the operation once.
    pub fn step(&mut self) -> Result<&VideoJobState, TryOnError> {
        if self.state.is_terminal() {
            return Ok(&self.state);
        }
        if self.cancel.is_cancelled() {
            self.state = VideoJobState::Cancelled;
            return Ok(&self.state);
        }
        if self.deadline_passed() {
            self.state = VideoJobState::TimedOut;
            return Ok(&self.state);
        }

        let polls = match self.state {
            VideoJobState::Polling { polls } => polls + 1,
            _ => 1,
        };
        self.state = match self.backend.poll_video(&self.operation).map_err(unexpected)? {
            VideoPoll::Pending => VideoJobState::Polling { polls },
            VideoPoll::Done { uri } => VideoJobState::Completed { uri },
        };
        tracing::debug!(polls, state = ?self.state, "video operation polled");
        emit_event(
            self.events,
            TryOnEvent::VideoPoll {
                operation: self.operation.name.clone(),
                polls,
                done: self.state.is_terminal(),
            },
        );
        Ok(&self.state)
    }

    /// Polls until a terminal state, sleeping `interval` between polls.
    pub fn wait(mut self) -> Result<Option<String>, TryOnError> {
        loop {
            match self.step()?.clone() {
                VideoJobState::Completed { uri } => return Ok(uri),
                VideoJobState::TimedOut => {
                    return Err(TryOnError::TimedOut {
                        seconds: self.settings.deadline.unwrap_or_default().as_secs(),
                    })
                }
                VideoJobState::Cancelled => return Err(TryOnError::Cancelled),
                VideoJobState::Submitted | VideoJobState::Polling { .. } => self.pause(),
            }
        }
    }

    fn deadline_passed(&self) -> bool {
        self.settings
            .deadline
            .map(|deadline| self.started.elapsed() >= deadline)
            .unwrap_or(false)
    }

    /// Sleeps for one poll interval, waking early on cancel or deadline.
    fn pause(&self) {
        let until = Instant::now() + self.settings.interval;
        loop {
            let now = Instant::now();
            if now >= until || self.cancel.is_cancelled() || self.deadline_passed() {
                return;
            }
            thread::sleep(SLEEP_SLICE.min(until - now));
        }
    }
}

fn unexpected(err: anyhow::Error) -> TryOnError {
    TryOnError::Unexpected(error_chain_text(&err, 512))
}

pub fn request_video<B>(
    backend: &B,
    front_view: &GeneratedImage,
    duration: VideoDuration,
    animation: AnimationType,
    settings: &PollSettings,
    cancel: &CancelToken,
    events: Option<&EventLog>,
) -> Result<VideoMedia, TryOnError>
where
    B: GenerativeBackend + ?Sized,
{
    if front_view.label != ViewLabel::Front {
        return Err(TryOnError::MissingFrontView);
    }

    let request = VideoCallRequest {
        image: front_view.src.clone(),
        prompt: build_video_prompt(animation, duration, VIDEO_ASPECT_RATIO),
        aspect_ratio: VIDEO_ASPECT_RATIO.to_string(),
        duration_seconds: duration.seconds(),
    };
    emit_event(
        events,
        TryOnEvent::VideoRequested {
            animation,
            duration_seconds: duration.seconds(),
            aspect_ratio: VIDEO_ASPECT_RATIO.to_string(),
        },
    );

    let job = VideoJob::submit(backend, &request, settings.clone(), cancel.clone())?
        .with_events(events);
    let Some(uri) = job.wait()? else {
        return Err(TryOnError::NoDownloadLink);
    };

    let media = backend.download_media(&uri).map_err(unexpected)?;
    if !media.is_success() {
        return Err(TryOnError::DownloadFailed {
            status: media.status,
        });
    }
    Ok(VideoMedia {
        mime_type: media.mime_type.unwrap_or_else(|| "video/mp4".to_string()),
        bytes: media.bytes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use anyhow::Result;
    use tryon_contracts::ImageAsset;

    use super::*;
    use crate::backend::{ImageCallRequest, MediaDownload, RemoteReply};

    /// Pending for `pending_polls` polls, then done with `uri`.
    struct SlowVideoBackend {
        pending_polls: usize,
        uri: Option<String>,
        download_status: u16,
        polls: AtomicUsize,
        starts: AtomicUsize,
        prompts: Mutex<Vec<String>>,
        cancel_after_first_poll: Option<CancelToken>,
    }

    impl SlowVideoBackend {
        fn new(pending_polls: usize, uri: Option<&str>, download_status: u16) -> Self {
            Self {
                pending_polls,
                uri: uri.map(str::to_string),
                download_status,
                polls: AtomicUsize::new(0),
                starts: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                cancel_after_first_poll: None,
            }
        }
    }

    impl GenerativeBackend for SlowVideoBackend {
        fn name(&self) -> &str {
            "slow-video"
        }

        fn generate_image(&self, _request: &ImageCallRequest) -> Result<RemoteReply> {
            anyhow::bail!("not scripted")
        }

        fn start_video(&self, request: &VideoCallRequest) -> Result<VideoOperation> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(VideoOperation {
                name: "operations/test".to_string(),
            })
        }

        fn poll_video(&self, _operation: &VideoOperation) -> Result<VideoPoll> {
            let seen = self.polls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_after_first_poll {
                token.cancel();
            }
            if seen < self.pending_polls {
                return Ok(VideoPoll::Pending);
            }
            Ok(VideoPoll::Done {
                uri: self.uri.clone(),
            })
        }

        fn download_media(&self, _uri: &str) -> Result<MediaDownload> {
            Ok(MediaDownload {
                status: self.download_status,
                mime_type: Some("video/mp4".to_string()),
                bytes: b"mp4-bytes".to_vec(),
            })
        }
    }

    fn front() -> GeneratedImage {
        GeneratedImage::new(ViewLabel::Front, ImageAsset::new("image/png", "RlJPTlQ="))
    }

    fn fast() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            deadline: None,
        }
    }

    #[test]
    fn polls_until_done_then_downloads() -> Result<()> {
        let backend = SlowVideoBackend::new(3, Some("https://media/v.mp4"), 200);
        let media = request_video(
            &backend,
            &front(),
            VideoDuration::Eight,
            AnimationType::SubtleSway,
            &fast(),
            &CancelToken::new(),
            None,
        )?;
        assert_eq!(media.bytes, b"mp4-bytes".to_vec());
        assert_eq!(backend.polls.load(Ordering::SeqCst), 4);
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("gentle, natural sway"));
        assert!(prompts[0].contains("8 seconds"));
        Ok(())
    }

    #[test]
    fn non_front_view_is_rejected_without_remote_calls() {
        let backend = SlowVideoBackend::new(0, Some("u"), 200);
        let side = GeneratedImage::new(ViewLabel::Left, ImageAsset::new("image/png", "eA=="));
        let err = request_video(
            &backend,
            &side,
            VideoDuration::Five,
            AnimationType::Turn360,
            &fast(),
            &CancelToken::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, TryOnError::MissingFrontView);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_uri_is_no_download_link() {
        let backend = SlowVideoBackend::new(0, None, 200);
        let err = request_video(
            &backend,
            &front(),
            VideoDuration::Five,
            AnimationType::Turn360,
            &fast(),
            &CancelToken::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, TryOnError::NoDownloadLink);
    }

    #[test]
    fn failed_download_carries_status() {
        let backend = SlowVideoBackend::new(0, Some("https://media/v.mp4"), 403);
        let err = request_video(
            &backend,
            &front(),
            VideoDuration::Ten,
            AnimationType::CatwalkPose,
            &fast(),
            &CancelToken::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, TryOnError::DownloadFailed { status: 403 });
    }

    #[test]
    fn deadline_stops_an_endless_operation() {
        let backend = SlowVideoBackend::new(usize::MAX, None, 200);
        let settings = PollSettings {
            interval: Duration::from_millis(5),
            deadline: Some(Duration::from_millis(30)),
        };
        let err = request_video(
            &backend,
            &front(),
            VideoDuration::Five,
            AnimationType::Turn360,
            &settings,
            &CancelToken::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TryOnError::TimedOut { .. }));
        assert!(backend.polls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn cancellation_stops_waiting() {
        let cancel = CancelToken::new();
        let mut backend = SlowVideoBackend::new(usize::MAX, None, 200);
        backend.cancel_after_first_poll = Some(cancel.clone());
        let settings = PollSettings {
            interval: Duration::from_secs(60),
            deadline: None,
        };
        let started = Instant::now();
        let err = request_video(
            &backend,
            &front(),
            VideoDuration::Five,
            AnimationType::Turn360,
            &settings,
            &cancel,
            None,
        )
        .unwrap_err();
        assert_eq!(err, TryOnError::Cancelled);
        assert_eq!(backend.polls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn job_steps_through_states() -> Result<()> {
        let backend = SlowVideoBackend::new(1, Some("u"), 200);
        let request = VideoCallRequest {
            image: front().src,
            prompt: "p".to_string(),
            aspect_ratio: VIDEO_ASPECT_RATIO.to_string(),
            duration_seconds: 5,
        };
        let mut job = VideoJob::submit(&backend, &request, fast(), CancelToken::new())?;
        assert_eq!(job.state(), &VideoJobState::Submitted);
        assert_eq!(job.step()?, &VideoJobState::Polling { polls: 1 });
        assert_eq!(
            job.step()?,
            &VideoJobState::Completed {
                uri: Some("u".to_string())
            }
        );
        assert!(job.state().is_terminal());
        Ok(())
    }
}
