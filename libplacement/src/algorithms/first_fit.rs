use crate::index::Candidate;
use crate::models::id_suffix;

use super::{Algorithm, fitting};

/// Visit nodes in ascending numeric id order and take the first that fits.
pub struct FirstFit;

impl Algorithm for FirstFit {
    fn name(&self) -> &str {
        "first-fit"
    }

    fn select(&self, cpu_request: u32, candidates: &[Candidate]) -> Option<String> {
        let mut fits = fitting(cpu_request, candidates);
        fits.sort_by_key(|c| id_suffix(&c.node_id));
        fits.first().map(|c| c.node_id.clone())
    }
}
