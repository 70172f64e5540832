//! The facade callers use to run queries against a fixed document set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{CancelFlag, Engine, ProgressCallback};
use crate::error::{Result, RlmError};
use crate::types::{Document, QueryResult};

/// The storage-facing collaborator. A real implementation backed by a
/// filesystem or database is out of scope here; the engine only ever
/// consumes `(name, content)` pairs through this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Document>>;

    async fn get(&self, name: &str) -> Result<Document>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// An in-memory `DocumentStore` sufficient for the CLI and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentStore {
    documents: Vec<Document>,
}

impl StaticDocumentStore {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentStore for StaticDocumentStore {
    async fn load_all(&self) -> Result<Vec<Document>> {
        Ok(self.documents.clone())
    }

    async fn get(&self, name: &str) -> Result<Document> {
        self.documents
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| RlmError::Internal(format!("no such document: {name}")))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.documents.iter().map(|d| d.name.clone()).collect())
    }
}

/// Holds an engine and a document store; `query` loads the relevant
/// documents and delegates to the engine.
pub struct Project {
    engine: Engine,
    store: Arc<dyn DocumentStore>,
}

impl Project {
    pub fn new(engine: Engine, store: Arc<dyn DocumentStore>) -> Self {
        Self { engine, store }
    }

    /// Run a query. When `doc_names` is given, only those documents are
    /// loaded; otherwise the full store contents are used.
    pub async fn query(
        &self,
        question: &str,
        doc_names: Option<&[String]>,
        on_progress: Option<ProgressCallback>,
        cancel: Option<CancelFlag>,
    ) -> Result<QueryResult> {
        let documents = match doc_names {
            Some(names) => {
                let mut docs = Vec::with_capacity(names.len());
                for name in names {
                    docs.push(self.store.get(name).await?);
                }
                docs
            }
            None => self.store.load_all().await?,
        };
        self.engine.query(&documents, question, on_progress, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_round_trips_documents() {
        let store = StaticDocumentStore::new(vec![Document::new("a.txt", "hello"), Document::new("b.txt", "world")]);
        assert_eq!(store.list().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(store.get("a.txt").await.unwrap().content, "hello");
        assert!(store.get("missing.txt").await.is_err());
        assert_eq!(store.load_all().await.unwrap().len(), 2);
    }
}
