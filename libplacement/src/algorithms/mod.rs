//! Bin-packing policies for pod placement.
//!
//! Each algorithm is a pure function of the CPU request and the candidate
//! list: two calls on an identical snapshot return the same node.

pub mod best_fit;
pub mod first_fit;
pub mod worst_fit;

use std::str::FromStr;

use thiserror::Error;

use crate::index::Candidate;
use best_fit::BestFit;
use first_fit::FirstFit;
use worst_fit::WorstFit;

pub trait Algorithm: Send + Sync {
    fn name(&self) -> &str;

    /// Pick a node for the request, or `None` when nothing fits.
    fn select(&self, cpu_request: u32, candidates: &[Candidate]) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    FirstFit,
    BestFit,
    WorstFit,
}

#[derive(Debug, Error)]
#[error("unknown scheduling algorithm {0:?}, expected first-fit, best-fit or worst-fit")]
pub struct UnknownPolicy(String);

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-fit" => Ok(Policy::FirstFit),
            "best-fit" => Ok(Policy::BestFit),
            "worst-fit" => Ok(Policy::WorstFit),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl Policy {
    pub fn algorithm(self) -> &'static dyn Algorithm {
        match self {
            Policy::FirstFit => &FirstFit,
            Policy::BestFit => &BestFit,
            Policy::WorstFit => &WorstFit,
        }
    }
}

fn fitting(cpu_request: u32, candidates: &[Candidate]) -> Vec<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.available >= cpu_request)
        .collect()
}
