//! What a caller sends alongside a query or after finishing a task.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::text::tokenize;
use crate::types::{NodeId, Timestamp};

/// Task context attached to a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryContext {
    pub task: Option<String>,
    pub active_files: Vec<String>,
    pub recent_errors: Vec<String>,
    pub goals: Vec<String>,
    /// Nodes the caller insists on; executive attention always keeps them.
    pub focus_nodes: Vec<NodeId>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_active_file(mut self, file: impl Into<String>) -> Self {
        self.active_files.push(file.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.recent_errors.push(error.into());
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goals.push(goal.into());
        self
    }

    pub fn with_focus(mut self, node: impl Into<NodeId>) -> Self {
        self.focus_nodes.push(node.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.task.is_none()
            && self.active_files.is_empty()
            && self.recent_errors.is_empty()
            && self.goals.is_empty()
            && self.focus_nodes.is_empty()
    }

    /// All context tokens: task, active files, recent errors and goals.
    pub fn tokens(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(task) = &self.task {
            out.extend(tokenize(task));
        }
        for text in self
            .active_files
            .iter()
            .chain(&self.recent_errors)
            .chain(&self.goals)
        {
            out.extend(tokenize(text));
        }
        out
    }

    /// Stable hash of the context tokens, hex encoded.
    pub fn hash(&self) -> String {
        hash_tokens(&self.tokens())
    }
}

/// Blake3 of a sorted token set. Identical across runs and platforms.
pub fn hash_tokens(tokens: &BTreeSet<String>) -> String {
    let mut hasher = blake3::Hasher::new();
    for t in tokens {
        hasher.update(t.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// How a reported task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Error,
    Partial,
}

impl OutcomeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(OutcomeKind::Success),
            "error" => Some(OutcomeKind::Error),
            "partial" => Some(OutcomeKind::Partial),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Error => "error",
            OutcomeKind::Partial => "partial",
        }
    }
}

/// Outcome report sent by the calling agent after a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_description: String,
    pub outcome: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    #[serde(default)]
    pub involved_files: Vec<String>,
    pub timestamp: Timestamp,
}

impl TaskOutcome {
    pub fn new(task: impl Into<String>, outcome: OutcomeKind) -> Self {
        Self {
            task_description: task.into(),
            outcome,
            error_details: None,
            involved_files: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(task: impl Into<String>) -> Self {
        Self::new(task, OutcomeKind::Success)
    }

    pub fn error(task: impl Into<String>, details: impl Into<String>) -> Self {
        let mut outcome = Self::new(task, OutcomeKind::Error);
        outcome.error_details = Some(details.into());
        outcome
    }

    pub fn partial(task: impl Into<String>) -> Self {
        Self::new(task, OutcomeKind::Partial)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.involved_files.push(file.into());
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}
