//! Task catalogue — the execution seam consulted by in-process workers and
//! by the peer executor endpoint.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::tasks::{TaskKind, TaskRequest, TaskResponse};

/// Maps a task request to its response. Implementations are free to run
/// anywhere; the core only sees `(request) -> response`.
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    async fn run(&self, request: &TaskRequest) -> Result<TaskResponse, CatalogError>;
}

/// The built-in catalogue covering every kind in the closed set, with an
/// optional simulated per-task latency for demos.
pub struct BuiltinCatalog {
    delay: Duration,
    supported: HashSet<TaskKind>,
}

impl BuiltinCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            delay: config.simulated_delay,
            supported: [TaskKind::Capitalize, TaskKind::Reverse, TaskKind::WordCount].into(),
        }
    }

    /// Restrict the catalogue to a subset of kinds. Requests outside the
    /// subset fail with `UnsupportedKind` (heterogeneous executors do not
    /// all carry the full set).
    pub fn with_kinds(config: CatalogConfig, kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        Self {
            delay: config.simulated_delay,
            supported: kinds.into_iter().collect(),
        }
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new(CatalogConfig::default())
    }
}

#[async_trait]
impl TaskCatalog for BuiltinCatalog {
    async fn run(&self, request: &TaskRequest) -> Result<TaskResponse, CatalogError> {
        if !self.supported.contains(&request.kind()) {
            return Err(CatalogError::UnsupportedKind {
                name: request.kind().to_string(),
            });
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match request {
            TaskRequest::Capitalize { text } => Ok(TaskResponse::Capitalize {
                result: text.to_uppercase(),
            }),
            TaskRequest::Reverse { text } => Ok(TaskResponse::Reverse {
                result: text.chars().rev().collect(),
            }),
            TaskRequest::WordCount { text } => Ok(TaskResponse::WordCount {
                count: text.split_whitespace().count() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> BuiltinCatalog {
        BuiltinCatalog::new(CatalogConfig {
            simulated_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn capitalize_uppercases() {
        let resp = catalog()
            .run(&TaskRequest::Capitalize {
                text: "hi".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            resp,
            TaskResponse::Capitalize {
                result: "HI".to_string()
            }
        );
    }

    #[tokio::test]
    async fn reverse_reverses_chars() {
        let resp = catalog()
            .run(&TaskRequest::Reverse {
                text: "abc".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            resp,
            TaskResponse::Reverse {
                result: "cba".to_string()
            }
        );
    }

    #[tokio::test]
    async fn word_count_counts_whitespace_separated_words() {
        let resp = catalog()
            .run(&TaskRequest::WordCount {
                text: "one  two\nthree".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(resp, TaskResponse::WordCount { count: 3 });
    }

    #[tokio::test]
    async fn restricted_catalog_rejects_unsupported_kind() {
        let catalog = BuiltinCatalog::with_kinds(
            CatalogConfig {
                simulated_delay: Duration::ZERO,
            },
            [TaskKind::Capitalize],
        );
        let err = catalog
            .run(&TaskRequest::Reverse {
                text: "abc".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedKind { .. }));
    }
}
