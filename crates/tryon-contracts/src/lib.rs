//! Data model, prompt construction and image normalization for the try-on
//! engine. Nothing in this crate talks to the network.

pub mod assets;
pub mod error;
pub mod events;
pub mod prompt;
pub mod results;
pub mod views;

pub use assets::{normalize_image, ImageAsset};
pub use error::TryOnError;
pub use events::{EventLog, TryOnEvent};
pub use results::{GeneratedImage, MissingView, ResultGroup, ResultGroupId, VideoState};
pub use views::{AnimationType, QualityTier, VideoDuration, ViewLabel};
