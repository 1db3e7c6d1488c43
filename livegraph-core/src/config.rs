//! Runtime configuration.
//!
//! The defaults keep every dependency edge until teardown. Hosts can build a
//! [`RuntimeConfig`] in code or deserialize it from any serde format.

use serde::{Deserialize, Serialize};

/// What happens to dependency edges a node stops reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Edges only ever grow; they are removed by teardown alone. A node
    /// keeps hearing from every parent it has ever read.
    #[default]
    Retain,

    /// After each successful evaluation, parents that were not read during
    /// that evaluation are detached, which may tear them down.
    Prune,
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub edge_policy: EdgePolicy,
}

impl RuntimeConfig {
    pub fn with_edge_policy(mut self, edge_policy: EdgePolicy) -> Self {
        self.edge_policy = edge_policy;
        self
    }
}
