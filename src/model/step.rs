use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UnknownStatus;

/// Lifecycle of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Errored,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Errored => "errored",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "errored" => Ok(StepStatus::Errored),
            other => Err(UnknownStatus {
                kind: "step",
                value: other.to_string(),
            }),
        }
    }
}

/// Side of the step/node link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    /// The node was consumed by the step.
    Input,
    /// The node was produced by the step.
    Output,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Input => "input",
            RelationshipType::Output => "output",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: i64,
    pub run_id: i64,
    /// 1-based, contiguous within the run.
    pub position: u32,
    pub step_type: String,
    pub method: String,
    /// Lineage key written into node ancestors.
    pub name: String,
    pub config: serde_json::Value,
    pub status: StepStatus,
    pub run_at: Option<DateTime<Utc>>,
}

/// A step row to be created alongside its run.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub step_type: String,
    pub method: String,
    pub name: String,
    pub config: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_strings() {
        assert_eq!("errored".parse::<StepStatus>(), Ok(StepStatus::Errored));
        assert_eq!(StepStatus::Completed.to_string(), "completed");
        assert!("failed".parse::<StepStatus>().is_err());
    }

    #[test]
    fn test_relationship_type_strings() {
        assert_eq!(RelationshipType::Input.as_str(), "input");
        assert_eq!(RelationshipType::Output.to_string(), "output");
    }
}
