//! Output savers.

use std::path::PathBuf;

use crate::config::{CsvOutputProperties, OutputColumn, OutputConfig};
use crate::error::OutputError;
use crate::model::Node;

/// Writes the final nodes of a run.
pub trait OutputSaver: Send + Sync {
    fn save(&self, nodes: &[Node]) -> Result<(), OutputError>;
}

/// Writes the configured node columns as a delimited file.
#[derive(Debug, Clone)]
pub struct CsvOutputSaver {
    path: PathBuf,
    delimiter: u8,
    columns: Vec<OutputColumn>,
    overwrite: bool,
}

impl CsvOutputSaver {
    pub fn new(properties: &CsvOutputProperties) -> Self {
        Self {
            path: properties.path.clone(),
            delimiter: properties.separator.as_bytes().first().copied().unwrap_or(b';'),
            columns: properties.columns.clone(),
            overwrite: properties.overwrite,
        }
    }

    fn cell(node: &Node, column: OutputColumn) -> Result<String, OutputError> {
        Ok(match column {
            OutputColumn::Value => node.value.clone(),
            OutputColumn::Ablated => node.ablated_text().to_string(),
            OutputColumn::Metadata => serde_json::to_string(&node.metadata)?,
        })
    }
}

impl OutputSaver for CsvOutputSaver {
    fn save(&self, nodes: &[Node]) -> Result<(), OutputError> {
        if self.path.exists() && !self.overwrite {
            return Err(OutputError::AlreadyExists(self.path.display().to_string()));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(&self.path)?;

        writer.write_record(self.columns.iter().map(|c| c.header()))?;
        for node in nodes {
            let row = self
                .columns
                .iter()
                .map(|column| Self::cell(node, *column))
                .collect::<Result<Vec<_>, _>>()?;
            writer.write_record(&row)?;
        }
        writer.flush()?;

        tracing::info!(path = %self.path.display(), nodes = nodes.len(), "Output saved");
        Ok(())
    }
}

pub fn build_output_saver(config: &OutputConfig) -> Box<dyn OutputSaver> {
    match config {
        OutputConfig::Csv(properties) => Box::new(CsvOutputSaver::new(properties)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saver(path: PathBuf, overwrite: bool) -> Box<dyn OutputSaver> {
        build_output_saver(&OutputConfig::Csv(CsvOutputProperties {
            path,
            separator: ";".to_string(),
            columns: vec![OutputColumn::Value, OutputColumn::Ablated, OutputColumn::Metadata],
            overwrite,
        }))
    }

    #[test]
    fn test_save_writes_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("result.csv");
        let nodes = vec![
            Node::new("kept"),
            Node::new("dropped")
                .with_ablated(true)
                .with_metadata(vec![serde_json::json!({ "label": "x", "start": 0 })]),
        ];

        saver(path.clone(), false).save(&nodes).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "value;ablated;metadata");
        assert_eq!(lines[1], "kept;NO;[]");
        assert_eq!(lines[2], "dropped;YES;\"[{\"\"label\"\":\"\"x\"\",\"\"start\"\":0}]\"");
    }

    #[test]
    fn test_existing_file_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.csv");
        std::fs::write(&path, "old\n").unwrap();

        let err = saver(path.clone(), false).save(&[Node::new("a")]).unwrap_err();
        assert!(matches!(err, OutputError::AlreadyExists(_)));

        saver(path.clone(), true).save(&[Node::new("a")]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "value;ablated;metadata\na;NO;[]\n");
    }
}
