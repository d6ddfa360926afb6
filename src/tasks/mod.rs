//! Task model — the closed set of task kinds and their typed payloads.

pub mod catalog;

pub use catalog::{BuiltinCatalog, TaskCatalog};

use serde::{Deserialize, Serialize};

/// Discriminator for the closed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Capitalize,
    Reverse,
    WordCount,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Capitalize => "capitalize",
            Self::Reverse => "reverse",
            Self::WordCount => "word_count",
        };
        write!(f, "{s}")
    }
}

/// A task's input payload. The variant is the task name; the payload shape
/// is fixed per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "request", rename_all = "snake_case")]
pub enum TaskRequest {
    Capitalize { text: String },
    Reverse { text: String },
    WordCount { text: String },
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Capitalize { .. } => TaskKind::Capitalize,
            Self::Reverse { .. } => TaskKind::Reverse,
            Self::WordCount { .. } => TaskKind::WordCount,
        }
    }
}

/// A task's output payload, shaped by the same discriminator as the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "response", rename_all = "snake_case")]
pub enum TaskResponse {
    Capitalize { result: String },
    Reverse { result: String },
    WordCount { count: u64 },
}

impl TaskResponse {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Capitalize { .. } => TaskKind::Capitalize,
            Self::Reverse { .. } => TaskKind::Reverse,
            Self::WordCount { .. } => TaskKind::WordCount,
        }
    }
}

/// A unit of work as handed to the queue. Immutable once created, except
/// that the queue attaches `response` when the task resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub request: TaskRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<TaskResponse>,
}

impl TaskDescriptor {
    pub fn new(request: TaskRequest) -> Self {
        Self {
            request,
            response: None,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.request.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_name_tag() {
        let req = TaskRequest::Capitalize {
            text: "hi".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["name"], "capitalize");
        assert_eq!(json["request"]["text"], "hi");
    }

    #[test]
    fn request_kind_matches_variant() {
        let req = TaskRequest::WordCount {
            text: "a b".to_string(),
        };
        assert_eq!(req.kind(), TaskKind::WordCount);
        assert_eq!(req.kind().to_string(), "word_count");
    }

    #[test]
    fn unknown_name_fails_to_decode() {
        let json = serde_json::json!({ "name": "summon", "request": { "text": "x" } });
        assert!(serde_json::from_value::<TaskRequest>(json).is_err());
    }
}
