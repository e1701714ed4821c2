use crate::index::Candidate;
use crate::models::id_suffix;

use super::{Algorithm, fitting};

/// Maximise the capacity left over after placement, spreading load across
/// the emptiest nodes. Ties go to the lowest numeric id.
pub struct WorstFit;

impl Algorithm for WorstFit {
    fn name(&self) -> &str {
        "worst-fit"
    }

    fn select(&self, cpu_request: u32, candidates: &[Candidate]) -> Option<String> {
        fitting(cpu_request, candidates)
            .into_iter()
            .max_by(|a, b| {
                (a.available - cpu_request)
                    .cmp(&(b.available - cpu_request))
                    .then_with(|| id_suffix(&b.node_id).cmp(&id_suffix(&a.node_id)))
            })
            .map(|c| c.node_id.clone())
    }
}
