//! Try-on session event log: one JSON object per line in `events.jsonl`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::results::{ResultGroupId, VideoState};
use crate::views::{AnimationType, QualityTier};

/// Everything a session records. Serialized with a `type` tag next to the
/// log's own `session_id` and `ts` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TryOnEvent {
    SessionStarted {
        media_dir: PathBuf,
    },
    BatchStarted {
        combinations: usize,
        outfits: usize,
        styles: usize,
        quality: QualityTier,
        backend: String,
    },
    CombinationStarted {
        index: usize,
        outfit_index: usize,
        style_index: Option<usize>,
        seed: i64,
    },
    ResultGroupCreated {
        index: usize,
        group_id: ResultGroupId,
        views: usize,
        missing_views: usize,
    },
    CombinationFailed {
        index: usize,
        kind: String,
        message: String,
    },
    BatchFinished {
        attempted: usize,
        succeeded: usize,
        failed: usize,
    },
    VideoRequested {
        animation: AnimationType,
        duration_seconds: u64,
        aspect_ratio: String,
    },
    VideoPoll {
        operation: String,
        polls: u32,
        done: bool,
    },
    VideoFinished {
        group_id: ResultGroupId,
        video: VideoState,
    },
    SessionReset {
        epoch: u64,
    },
}

impl TryOnEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::BatchStarted { .. } => "batch_started",
            Self::CombinationStarted { .. } => "combination_started",
            Self::ResultGroupCreated { .. } => "result_group_created",
            Self::CombinationFailed { .. } => "combination_failed",
            Self::BatchFinished { .. } => "batch_finished",
            Self::VideoRequested { .. } => "video_requested",
            Self::VideoPoll { .. } => "video_poll",
            Self::VideoFinished { .. } => "video_finished",
            Self::SessionReset { .. } => "session_reset",
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a TryOnEvent,
}

/// Append-only `events.jsonl` for one session. The file is opened on the
/// first event and kept open.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn record(&self, event: &TryOnEvent) -> Result<()> {
        let line = serde_json::to_string(&EventLine {
            session_id: &self.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        })?;

        let mut guard = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(anyhow!("event log {} is not open", self.path.display()));
        };
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))
    }
}

/// Reads an `events.jsonl` back into typed events, in file order.
pub fn read_event_log(path: &Path) -> Result<Vec<TryOnEvent>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("bad event on line {} of {}", index + 1, path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::Value;

    use super::*;
    use crate::assets::ImageAsset;

    #[test]
    fn line_carries_tag_session_and_timestamp() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "sess-42");
        log.record(&TryOnEvent::VideoRequested {
            animation: AnimationType::Turn360,
            duration_seconds: 8,
            aspect_ratio: "9:16".to_string(),
        })?;

        let raw = fs::read_to_string(&path)?;
        let line: Value = serde_json::from_str(raw.trim_end())?;
        assert_eq!(line["type"], "video_requested");
        assert_eq!(line["session_id"], "sess-42");
        assert_eq!(line["animation"], "360-turn");
        assert_eq!(line["duration_seconds"], 8);
        DateTime::parse_from_rfc3339(line["ts"].as_str().unwrap_or_default())?;
        Ok(())
    }

    #[test]
    fn video_finished_embeds_the_group_video_state() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let group_id = ResultGroupId::derive(3, &ImageAsset::new("image/png", "b3V0Zml0"), None);
        let event = TryOnEvent::VideoFinished {
            group_id: group_id.clone(),
            video: VideoState::Failed {
                message: "Failed to download the generated video (status: 403).".to_string(),
            },
        };
        let log = EventLog::new(&path, "sess-1");
        log.record(&event)?;

        let raw = fs::read_to_string(&path)?;
        let line: Value = serde_json::from_str(raw.trim_end())?;
        assert_eq!(line["group_id"], group_id.as_str());
        assert_eq!(line["video"]["state"], "failed");
        assert_eq!(read_event_log(&path)?, vec![event]);
        Ok(())
    }

    #[test]
    fn events_append_in_order_and_parent_dirs_are_created() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("run").join("events.jsonl");
        let log = EventLog::new(&path, "sess-7");
        let events = vec![
            TryOnEvent::SessionStarted {
                media_dir: temp.path().to_path_buf(),
            },
            TryOnEvent::BatchFinished {
                attempted: 2,
                succeeded: 1,
                failed: 1,
            },
            TryOnEvent::SessionReset { epoch: 1 },
        ];
        for event in &events {
            log.record(event)?;
        }

        let read = read_event_log(&path)?;
        assert_eq!(read, events);
        let kinds: Vec<&str> = read.iter().map(TryOnEvent::kind).collect();
        assert_eq!(kinds, vec!["session_started", "batch_finished", "session_reset"]);
        Ok(())
    }

    #[test]
    fn unreadable_line_names_its_position() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        fs::write(&path, "{\"type\":\"session_reset\",\"epoch\":1}\nnot json\n")?;
        let err = read_event_log(&path).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        Ok(())
    }
}
