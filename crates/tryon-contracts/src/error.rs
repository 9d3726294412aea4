use crate::views::ViewLabel;

/// Every failure the try-on pipeline surfaces to a user.
///
/// The `Display` text is what ends up in the page-level error area or in a
/// result group's video error, so variants carry human-readable messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TryOnError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Could not decode the image: {0}")]
    DecodeError(String),

    #[error("Could not re-encode the image: {0}")]
    EncodeError(String),

    #[error("{}", blocked_message(.reason.as_deref()))]
    Blocked { reason: Option<String> },

    #[error("{0}")]
    ContentRejected(String),

    #[error("Could not generate the {view}. The model did not return an image.")]
    NoImageReturned { view: ViewLabel },

    #[error("{0}")]
    MissingInput(String),

    #[error("Could not find the front view image, which is required to generate the video.")]
    MissingFrontView,

    #[error("Video generation completed, but no download link was provided by the API.")]
    NoDownloadLink,

    #[error("Failed to download the generated video (status: {status}).")]
    DownloadFailed { status: u16 },

    #[error("No result group with id '{0}'.")]
    UnknownResultGroup(String),

    #[error("A video is already being generated for result group '{0}'.")]
    VideoAlreadyLoading(String),

    #[error("Video generation did not finish within {seconds}s.")]
    TimedOut { seconds: u64 },

    #[error("Video generation was cancelled.")]
    Cancelled,

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

fn blocked_message(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("Request was blocked: {reason}"),
        None => "The model returned no valid response.".to_string(),
    }
}

impl TryOnError {
    /// Stable snake_case tag used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DecodeError(_) => "decode_error",
            Self::EncodeError(_) => "encode_error",
            Self::Blocked { .. } => "blocked",
            Self::ContentRejected(_) => "content_rejected",
            Self::NoImageReturned { .. } => "no_image_returned",
            Self::MissingInput(_) => "missing_input",
            Self::MissingFrontView => "missing_front_view",
            Self::NoDownloadLink => "no_download_link",
            Self::DownloadFailed { .. } => "download_failed",
            Self::UnknownResultGroup(_) => "unknown_result_group",
            Self::VideoAlreadyLoading(_) => "video_already_loading",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Unexpected(_) => "unexpected",
        }
    }
}
