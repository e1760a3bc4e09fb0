//! Timed exam sections.
//!
//! Entering a section fetches its content and attaches a persistent
//! countdown keyed by attempt and section. The section ends either by manual
//! submission or when the countdown expires, which forces a submission of
//! whatever answers were drafted.

pub mod section;

use serde::{Deserialize, Serialize};

pub use section::{ActiveSection, ExamRunner, PendingDeadline};

/// Prefix of every section deadline key in the durable store
pub const TIMER_KEY_PREFIX: &str = "exam-timer:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionKind {
    Listening,
    Reading,
    Writing,
}

impl SectionKind {
    pub const ALL: [SectionKind; 3] = [SectionKind::Listening, SectionKind::Reading, SectionKind::Writing];

    /// Name the backend uses in paths and bodies
    pub fn wire_name(&self) -> &'static str {
        match self {
            SectionKind::Listening => "LISTENING",
            SectionKind::Reading => "READING",
            SectionKind::Writing => "WRITING",
        }
    }

    /// Last segment of the section's route
    pub fn route_segment(&self) -> &'static str {
        match self {
            SectionKind::Listening => "listening",
            SectionKind::Reading => "reading",
            SectionKind::Writing => "writing",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SectionKind::Listening => "Listening",
            SectionKind::Reading => "Reading",
            SectionKind::Writing => "Writing",
        }
    }

    /// Case-insensitive parse of a section name
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.wire_name().eq_ignore_ascii_case(s.trim()))
    }
}

/// Durable key of the countdown for one section of one attempt.
pub fn timer_key(attempt_id: &str, kind: SectionKind) -> String {
    format!("{}{}:{}", TIMER_KEY_PREFIX, attempt_id, kind.wire_name())
}

/// Route of a section screen.
pub fn section_path(attempt_id: &str, kind: SectionKind) -> String {
    format!("/attempt/{}/{}", attempt_id, kind.route_segment())
}

/// Section lengths in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDurations {
    pub listening: i64,
    pub reading: i64,
    pub writing: i64,
}

impl SectionDurations {
    pub fn for_kind(&self, kind: SectionKind) -> i64 {
        match kind {
            SectionKind::Listening => self.listening,
            SectionKind::Reading => self.reading,
            SectionKind::Writing => self.writing,
        }
    }
}

impl Default for SectionDurations {
    fn default() -> Self {
        Self {
            listening: 30 * 60,
            reading: 60 * 60,
            writing: 60 * 60,
        }
    }
}
