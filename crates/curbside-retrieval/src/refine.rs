//! Relevance refinement: ask the generator which of the top candidates are
//! really about the query.
//!
//! Advisory only. Any failure, an unparsable answer, or an answer that keeps
//! nothing leaves the candidate list as it was.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use curbside_core::source::ReportSource;
use curbside_vector::text::canonical_text;

use crate::generation::TextGenerator;

const REFINER_INSTRUCTION: &str = "You review search results for accessibility barrier reports.\n\
Given a search query and candidate reports, decide which reports are truly relevant to the query.\n\
Respond with ONLY a JSON array of the relevant report ids, most relevant first.";

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("Invalid uuid regex")
});

/// Candidates after refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    pub candidates: Vec<Uuid>,
    /// False when the list was passed through untouched.
    pub applied: bool,
}

impl RefineOutcome {
    fn unchanged(candidates: &[Uuid]) -> Self {
        Self {
            candidates: candidates.to_vec(),
            applied: false,
        }
    }
}

#[derive(Clone)]
pub struct Refiner {
    generator: Arc<dyn TextGenerator>,
    source: Arc<dyn ReportSource>,
    window: usize,
}

impl Refiner {
    /// `window` is how many top candidates are shown to the generator.
    /// Candidates beyond it are kept as they are.
    pub fn new(generator: Arc<dyn TextGenerator>, source: Arc<dyn ReportSource>, window: usize) -> Self {
        Self {
            generator,
            source,
            window,
        }
    }

    pub async fn refine(&self, query: &str, candidates: &[Uuid]) -> RefineOutcome {
        let split = self.window.min(candidates.len());
        if split == 0 {
            return RefineOutcome::unchanged(candidates);
        }
        let (window, rest) = candidates.split_at(split);

        let reports = match self.source.get_reports(window) {
            Ok(reports) => reports,
            Err(e) => {
                warn!(error = %e, "Could not load candidates for refinement, keeping all");
                return RefineOutcome::unchanged(candidates);
            }
        };
        let listing: String = reports
            .iter()
            .map(|r| format!("- {}: {}\n", r.id, canonical_text(r)))
            .collect();
        let prompt = format!("Query: {}\n\nCandidate reports:\n{}", query, listing);

        let output = match self.generator.complete(REFINER_INSTRUCTION, &prompt).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Refinement unavailable, keeping all candidates");
                return RefineOutcome::unchanged(candidates);
            }
        };

        let selected = parse_selection(&output);
        let kept: Vec<Uuid> = window
            .iter()
            .filter(|id| selected.contains(*id))
            .copied()
            .collect();
        if kept.is_empty() {
            warn!("Refinement selected no known candidate, keeping all");
            return RefineOutcome::unchanged(candidates);
        }

        debug!(shown = window.len(), kept = kept.len(), "Refined candidates");
        let mut refined = kept;
        refined.extend_from_slice(rest);
        RefineOutcome {
            candidates: refined,
            applied: true,
        }
    }
}

/// Every well-formed id mentioned in the answer.
fn parse_selection(output: &str) -> HashSet<Uuid> {
    UUID_PATTERN
        .find_iter(output)
        .filter_map(|m| Uuid::parse_str(m.as_str()).ok())
        .collect()
}
