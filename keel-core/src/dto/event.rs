//! Event submission DTOs

use serde::{Deserialize, Serialize};

use crate::dto::run::RunSummary;

/// Response to an accepted event
///
/// One run per pipeline whose triggers matched. An empty list means no
/// pipeline was triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub runs: Vec<RunSummary>,
}

impl EventAccepted {
    pub fn triggered(&self) -> bool {
        !self.runs.is_empty()
    }
}
