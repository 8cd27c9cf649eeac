//! Gallery matching under a distance tolerance.

use crate::gallery::SignatureStore;
use crate::types::Signature;
use serde::{Deserialize, Serialize};

/// Default maximum distance for a match. Lower is stricter.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Outcome of comparing one probe signature against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Approved { identity: String, distance: f32 },
    Unknown {
        /// Smallest distance seen, `None` when nothing was comparable.
        nearest: Option<f32>,
    },
}

impl MatchResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, MatchResult::Approved { .. })
    }
}

/// Strategy for comparing a probe signature against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Signature, gallery: &SignatureStore, tolerance: f32) -> MatchResult;
}

/// First entry in gallery order within tolerance wins.
///
/// Order-dependent on purpose: with two enrolled faces both within
/// tolerance, the one enrolled first is reported even if the other is
/// closer.
pub struct FirstMatch;

impl Matcher for FirstMatch {
    fn compare(&self, probe: &Signature, gallery: &SignatureStore, tolerance: f32) -> MatchResult {
        let mut nearest: Option<f32> = None;

        for entry in gallery.iter() {
            let distance = probe.distance(&entry.signature);
            if distance <= tolerance {
                return MatchResult::Approved {
                    identity: entry.name.clone(),
                    distance,
                };
            }
            if distance.is_finite() {
                nearest = Some(nearest.map_or(distance, |n| n.min(distance)));
            }
        }

        MatchResult::Unknown { nearest }
    }
}

/// Closest entry wins if within tolerance; ties go to the earlier entry.
pub struct NearestMatch;

impl Matcher for NearestMatch {
    fn compare(&self, probe: &Signature, gallery: &SignatureStore, tolerance: f32) -> MatchResult {
        let mut best: Option<(&str, f32)> = None;

        for entry in gallery.iter() {
            let distance = probe.distance(&entry.signature);
            if !distance.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry.name.as_str(), distance));
            }
        }

        match best {
            Some((name, distance)) if distance <= tolerance => MatchResult::Approved {
                identity: name.to_string(),
                distance,
            },
            other => MatchResult::Unknown {
                nearest: other.map(|(_, d)| d),
            },
        }
    }
}

/// Runtime-selectable matching policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    First,
    Nearest,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy {other:?} (expected first or nearest)")),
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Nearest => f.write_str("nearest"),
        }
    }
}

impl Matcher for MatchPolicy {
    fn compare(&self, probe: &Signature, gallery: &SignatureStore, tolerance: f32) -> MatchResult {
        match self {
            MatchPolicy::First => FirstMatch.compare(probe, gallery, tolerance),
            MatchPolicy::Nearest => NearestMatch.compare(probe, gallery, tolerance),
        }
    }
}
