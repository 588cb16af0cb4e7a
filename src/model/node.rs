use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::UnknownStatus;

/// Lineage key written into the ancestors of every node loaded from input.
pub const SOURCE_LINEAGE_KEY: &str = "source";

/// Step name to the id of the node that step contributed for this lineage.
pub type Ancestors = BTreeMap<String, i64>;

/// Resume bookkeeping for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not yet folded into a later step's output.
    #[default]
    Pending,
    /// Consumed by the step it was handed to.
    Processed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Processed => "processed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NodeStatus::Pending),
            "processed" => Ok(NodeStatus::Processed),
            other => Err(UnknownStatus {
                kind: "node",
                value: other.to_string(),
            }),
        }
    }
}

/// A single unit of text data at one point in the pipeline.
///
/// Nodes are built in memory by input loaders and step executors and only
/// receive an `id` once persisted. After persistence only `status` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Option<i64>,
    pub parent_node_id: Option<i64>,
    pub value: String,
    pub ablated: bool,
    pub ancestors: Ancestors,
    pub status: NodeStatus,
    pub metadata: Vec<serde_json::Value>,
}

impl Node {
    /// Creates an unpersisted node with no parent, as loaded from input.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: None,
            parent_node_id: None,
            value: value.into(),
            ablated: false,
            ancestors: Ancestors::new(),
            status: NodeStatus::Pending,
            metadata: Vec::new(),
        }
    }

    /// Creates an unpersisted node derived from `parent`.
    pub fn derived_from(parent: &Node, value: impl Into<String>) -> Self {
        Self {
            parent_node_id: parent.id,
            ..Self::new(value)
        }
    }

    pub fn with_ablated(mut self, ablated: bool) -> Self {
        self.ablated = ablated;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Text rendering of the ablation flag used by output writers.
    pub fn ablated_text(&self) -> &'static str {
        if self.ablated {
            "YES"
        } else {
            "NO"
        }
    }
}
