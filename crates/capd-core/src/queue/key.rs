//! Composite job identity.

use std::fmt;

/// (channel, video) pair identifying one capture job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
    pub channel_id: String,
    pub video_id: String,
}

impl JobKey {
    pub fn new(channel_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            video_id: video_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.channel_id, self.video_id)
    }
}
