use crate::models::NodeSnapshot;

/// One row of the scheduling view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node_id: String,
    pub capacity: u32,
    pub available: u32,
}

/// Derived allocation view over the registry. A pure projection: it is
/// rebuilt from a fresh snapshot at every scheduling decision and never
/// mutated on its own. Running totals between decisions come from the
/// registry itself, which commits placements synchronously.
#[derive(Debug, Clone, Default)]
pub struct PlacementIndex {
    entries: Vec<Candidate>,
}

impl PlacementIndex {
    pub fn from_snapshot(snapshot: &[NodeSnapshot]) -> Self {
        let entries = snapshot
            .iter()
            .map(|n| Candidate {
                node_id: n.node_id.clone(),
                capacity: n.capacity,
                available: n.available,
            })
            .collect();
        Self { entries }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.entries
    }

    /// Largest single-node headroom; the cut-off between pods that might
    /// still be rescheduled and pods that are definitely unfit.
    pub fn max_available(&self) -> u32 {
        self.entries.iter().map(|c| c.available).max().unwrap_or(0)
    }
}
