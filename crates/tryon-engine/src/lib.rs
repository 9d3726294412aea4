//! Try-on generation engine: remote backends, per-combination view fan-out,
//! batch coordination, video previews and the session that ties them
//! together.

pub mod backend;
pub mod batch;
pub mod config;
pub mod gemini;
pub mod orchestrator;
pub mod session;
pub mod video;

use tryon_contracts::{EventLog, TryOnEvent};

pub use backend::{DryrunBackend, GenerativeBackend};
pub use batch::{
    run_batch, BatchInput, BatchOutcome, BatchRunner, GroupIdSequence, MISSING_INPUT_MESSAGE,
};
pub use config::EngineConfig;
pub use gemini::GeminiBackend;
pub use orchestrator::{generate_views, CombinationRequest, ViewAggregation, ViewSet};
pub use session::{TryOnSession, VideoTicket};
pub use video::{request_video, CancelToken, PollSettings, VideoJob, VideoJobState, VideoMedia};

/// Fresh identifier for a session's event log.
pub fn new_session_id() -> String {
    format!("sess-{}", uuid::Uuid::new_v4().simple())
}

/// Best-effort event emission; a failed write is logged, never propagated.
pub(crate) fn emit_event(events: Option<&EventLog>, event: TryOnEvent) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.record(&event) {
        tracing::warn!(event = event.kind(), error = %format!("{err:#}"), "failed to write event");
    }
}
