//! Input loaders.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::{CsvInputProperties, InputConfig};
use crate::error::InputError;
use crate::model::Node;
use crate::storage::Database;

/// Produces the initial nodes of a run.
#[async_trait]
pub trait InputLoader: Send + Sync {
    /// Loads the source records and persists them as source nodes.
    async fn load(&self, db: &Database) -> Result<Vec<Node>, InputError>;
}

/// Reads one column of a delimited file.
#[derive(Debug, Clone)]
pub struct CsvInputLoader {
    path: PathBuf,
    target_column: String,
    delimiter: u8,
    limit: Option<usize>,
}

impl CsvInputLoader {
    pub fn new(properties: &CsvInputProperties) -> Self {
        Self {
            path: properties.path.clone(),
            target_column: properties.target_column.clone(),
            delimiter: properties.separator.as_bytes().first().copied().unwrap_or(b';'),
            limit: properties.limit,
        }
    }

    /// Reads the target column without touching the database.
    pub fn read_values(&self) -> Result<Vec<String>, InputError> {
        if !self.path.is_file() {
            return Err(InputError::MissingFile(self.path.display().to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(&self.path)?;

        let headers = reader.headers()?.clone();
        let column = headers
            .iter()
            .position(|h| h.trim() == self.target_column)
            .ok_or_else(|| InputError::MissingColumn {
                column: self.target_column.clone(),
                available: headers.iter().collect::<Vec<_>>().join(", "),
            })?;

        let mut values = Vec::new();
        for record in reader.records() {
            if self.limit.is_some_and(|limit| values.len() >= limit) {
                break;
            }
            let record = record?;
            values.push(record.get(column).unwrap_or_default().to_string());
        }
        Ok(values)
    }
}

#[async_trait]
impl InputLoader for CsvInputLoader {
    async fn load(&self, db: &Database) -> Result<Vec<Node>, InputError> {
        let mut nodes: Vec<Node> = self.read_values()?.into_iter().map(Node::new).collect();
        db.persist_source_nodes(&mut nodes).await?;
        tracing::info!(
            path = %self.path.display(),
            column = %self.target_column,
            nodes = nodes.len(),
            "Input loaded"
        );
        Ok(nodes)
    }
}

pub fn build_input_loader(config: &InputConfig) -> Box<dyn InputLoader> {
    match config {
        InputConfig::Csv(properties) => Box::new(CsvInputLoader::new(properties)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SOURCE_LINEAGE_KEY;
    use crate::storage::database::test_support::temp_database;

    fn properties(path: PathBuf, limit: Option<usize>) -> CsvInputProperties {
        CsvInputProperties {
            path,
            target_column: "content".to_string(),
            separator: ";".to_string(),
            limit,
        }
    }

    #[tokio::test]
    async fn test_load_persists_source_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.csv");
        std::fs::write(&path, "id;content\n1;hello world\n2;\"semi;colon\"\n3;third\n").unwrap();
        let db = temp_database(&dir).await;

        let loader = build_input_loader(&InputConfig::Csv(properties(path, Some(2))));
        let nodes = loader.load(&db).await.unwrap();

        assert_eq!(
            nodes.iter().map(|n| n.value.as_str()).collect::<Vec<_>>(),
            vec!["hello world", "semi;colon"]
        );
        for node in &nodes {
            let id = node.id.unwrap();
            assert_eq!(node.ancestors.get(SOURCE_LINEAGE_KEY), Some(&id));
            assert_eq!(node.parent_node_id, None);
        }
    }

    #[test]
    fn test_missing_column_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.csv");
        std::fs::write(&path, "id;text\n1;a\n").unwrap();

        let err = CsvInputLoader::new(&properties(path, None))
            .read_values()
            .unwrap_err();
        match err {
            InputError::MissingColumn { column, available } => {
                assert_eq!(column, "content");
                assert_eq!(available, "id, text");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let loader = CsvInputLoader::new(&properties(PathBuf::from("/nonexistent/in.csv"), None));
        assert!(matches!(loader.read_values(), Err(InputError::MissingFile(_))));
    }
}
