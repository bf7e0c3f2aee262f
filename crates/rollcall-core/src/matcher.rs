//! Gallery matching strategies.
//!
//! Both strategies accept a gallery entry only when its cosine similarity is
//! strictly greater than the threshold. Entries whose similarity is undefined
//! (zero norm, dimension mismatch) never match.

use crate::types::{Embedding, EnrolledPerson, MatchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledPerson], threshold: f32) -> MatchResult;
}

/// Accepts the first gallery entry, in enumeration order, above threshold.
///
/// The result depends on gallery order when several entries clear the
/// threshold. Callers that need nearest-neighbour semantics use [`BestMatch`].
pub struct FirstAboveThreshold;

impl Matcher for FirstAboveThreshold {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledPerson], threshold: f32) -> MatchResult {
        let mut best_sim: Option<f32> = None;

        for person in gallery {
            let Some(sim) = similarity_or_warn(probe, person) else {
                continue;
            };
            if sim > threshold {
                return MatchResult::accepted(person, sim);
            }
            if best_sim.map_or(true, |b| sim > b) {
                best_sim = Some(sim);
            }
        }

        MatchResult::no_match(best_sim.unwrap_or(0.0))
    }
}

/// Accepts the most similar gallery entry, if it is above threshold.
pub struct BestMatch;

impl Matcher for BestMatch {
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledPerson], threshold: f32) -> MatchResult {
        let mut best: Option<(f32, &EnrolledPerson)> = None;

        for person in gallery {
            let Some(sim) = similarity_or_warn(probe, person) else {
                continue;
            };
            if best.map_or(true, |(b, _)| sim > b) {
                best = Some((sim, person));
            }
        }

        match best {
            Some((sim, person)) if sim > threshold => MatchResult::accepted(person, sim),
            Some((sim, _)) => MatchResult::no_match(sim),
            None => MatchResult::no_match(0.0),
        }
    }
}

fn similarity_or_warn(probe: &Embedding, person: &EnrolledPerson) -> Option<f32> {
    let sim = probe.similarity(&person.embedding);
    if sim.is_none() {
        tracing::warn!(
            person = %person.id,
            probe_dim = probe.dim(),
            stored_dim = person.embedding.dim(),
            "similarity undefined (zero norm or dimension mismatch); treating as non-match"
        );
    }
    sim
}

/// Configurable choice of [`Matcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// First entry above threshold, in store order.
    #[default]
    First,
    /// Highest-similarity entry above threshold.
    Best,
}

impl MatchStrategy {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            MatchStrategy::First => Box::new(FirstAboveThreshold),
            MatchStrategy::Best => Box::new(BestMatch),
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchStrategy::First),
            "best" => Ok(MatchStrategy::Best),
            other => Err(format!("unknown match strategy '{other}' (expected 'first' or 'best')")),
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::First => f.write_str("first"),
            MatchStrategy::Best => f.write_str("best"),
        }
    }
}
