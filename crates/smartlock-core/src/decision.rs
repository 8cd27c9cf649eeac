use chrono::{DateTime, Local};
use serde::Serialize;

/// What the gate concluded about the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// An evaluated frame contained no faces.
    NoFace,
    /// The gallery is empty, so nothing can be approved.
    NoEnrolled,
    /// A face matched the named gallery entry.
    Approved { identity: String },
    /// Faces were present but none matched.
    Unknown,
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved { .. })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::NoFace => f.write_str("NO_FACE"),
            Verdict::NoEnrolled => f.write_str("NO_ENROLLED"),
            Verdict::Approved { identity } => write!(f, "APPROVED({identity})"),
            Verdict::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A verdict stamped with the moment it was reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub captured_at: DateTime<Local>,
}

impl Decision {
    pub fn now(verdict: Verdict) -> Self {
        Self {
            verdict,
            captured_at: Local::now(),
        }
    }
}
