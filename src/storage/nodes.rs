//! Node store and lineage.
//!
//! Every persisted node carries an `ancestors` map. A node produced by step
//! `S` from parent `P` gets `P.ancestors ∪ {S.name: id}`; a node without a
//! parent starts from `{S.name: id}`. The map is computed inside the same
//! transaction that assigns the id.

use std::collections::HashMap;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::model::{Ancestors, Node, NodeStatus, RelationshipType, Step, SOURCE_LINEAGE_KEY};

use super::database::{Database, DatabaseError};

const NODE_COLUMNS: &str = "node.id, node.parent_node_id, node.ablated, node.value, node.ancestors, node.status, node.metadata";

fn node_from_row(row: &SqliteRow) -> Result<Node, DatabaseError> {
    let ancestors: String = row.get("ancestors");
    let metadata: String = row.get("metadata");
    let status: String = row.get("status");

    Ok(Node {
        id: Some(row.get("id")),
        parent_node_id: row.get("parent_node_id"),
        value: row.get("value"),
        ablated: row.get::<i64, _>("ablated") != 0,
        ancestors: serde_json::from_str(&ancestors)?,
        status: status.parse()?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

/// Inserts `node`, then backfills its ancestors with the assigned id.
async fn insert_with_lineage(
    conn: &mut SqliteConnection,
    node: &mut Node,
    mut ancestors: Ancestors,
    lineage_key: &str,
) -> Result<i64, DatabaseError> {
    let metadata = serde_json::to_string(&node.metadata)?;

    let id = sqlx::query(
        "INSERT INTO node (parent_node_id, ablated, value, ancestors, status, metadata)
         VALUES (?1, ?2, ?3, '{}', ?4, ?5)",
    )
    .bind(node.parent_node_id)
    .bind(node.ablated as i64)
    .bind(&node.value)
    .bind(node.status.as_str())
    .bind(&metadata)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    ancestors.insert(lineage_key.to_string(), id);

    sqlx::query("UPDATE node SET ancestors = ?1 WHERE id = ?2")
        .bind(serde_json::to_string(&ancestors)?)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    node.id = Some(id);
    node.ancestors = ancestors;
    Ok(id)
}

async fn link_node(
    conn: &mut SqliteConnection,
    step_id: i64,
    node_id: i64,
    relationship: RelationshipType,
) -> Result<(), DatabaseError> {
    sqlx::query(
        "INSERT OR IGNORE INTO step_node (step_id, node_id, relationship_type) VALUES (?1, ?2, ?3)",
    )
    .bind(step_id)
    .bind(node_id)
    .bind(relationship.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn mark_processed(conn: &mut SqliteConnection, node_id: i64) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE node SET status = ?1 WHERE id = ?2")
        .bind(NodeStatus::Processed.as_str())
        .bind(node_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn stored_ancestors(
    conn: &mut SqliteConnection,
    node_id: i64,
) -> Result<Ancestors, DatabaseError> {
    let row = sqlx::query("SELECT ancestors FROM node WHERE id = ?1")
        .bind(node_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("node {}", node_id)))?;
    let ancestors: String = row.get("ancestors");
    Ok(serde_json::from_str(&ancestors)?)
}

fn persisted_id(node: &Node) -> Result<i64, DatabaseError> {
    node.id
        .ok_or_else(|| DatabaseError::InvalidData(format!("node '{}' has no id", node.value)))
}

impl Database {
    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persists freshly loaded input nodes, seeding `{"source": id}`.
    pub async fn persist_source_nodes(&self, nodes: &mut [Node]) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        for node in nodes.iter_mut().filter(|n| !n.is_persisted()) {
            insert_with_lineage(&mut *tx, node, Ancestors::new(), SOURCE_LINEAGE_KEY).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Persists a step's outputs with lineage and links both sides.
    ///
    /// Outputs that already carry an id (saved during execution, or passed
    /// through from a previous attempt) are only linked. Every input is
    /// marked `processed`.
    pub async fn create_with_lineage(
        &self,
        step: &Step,
        inputs: &[Node],
        outputs: &mut [Node],
    ) -> Result<(), DatabaseError> {
        let parents: HashMap<i64, &Ancestors> = inputs
            .iter()
            .filter_map(|n| n.id.map(|id| (id, &n.ancestors)))
            .collect();

        let mut tx = self.pool().begin().await?;

        for output in outputs.iter_mut() {
            if !output.is_persisted() {
                let base = match output.parent_node_id {
                    Some(parent_id) => match parents.get(&parent_id) {
                        Some(ancestors) => (*ancestors).clone(),
                        None => stored_ancestors(&mut *tx, parent_id).await?,
                    },
                    None => Ancestors::new(),
                };
                insert_with_lineage(&mut *tx, output, base, &step.name).await?;
            }
            link_node(&mut *tx, step.id, persisted_id(output)?, RelationshipType::Output).await?;
        }

        for input in inputs {
            let id = persisted_id(input)?;
            link_node(&mut *tx, step.id, id, RelationshipType::Input).await?;
            mark_processed(&mut *tx, id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Persists one output as soon as it is produced and folds its input.
    pub async fn save_during_execution(
        &self,
        step: &Step,
        input: &Node,
        output: &mut Node,
    ) -> Result<(), DatabaseError> {
        let input_id = persisted_id(input)?;
        let mut tx = self.pool().begin().await?;

        if !output.is_persisted() {
            let base = if output.parent_node_id == Some(input_id) {
                input.ancestors.clone()
            } else {
                match output.parent_node_id {
                    Some(parent_id) => stored_ancestors(&mut *tx, parent_id).await?,
                    None => Ancestors::new(),
                }
            };
            insert_with_lineage(&mut *tx, output, base, &step.name).await?;
        }

        link_node(&mut *tx, step.id, input_id, RelationshipType::Input).await?;
        link_node(&mut *tx, step.id, persisted_id(output)?, RelationshipType::Output).await?;
        mark_processed(&mut *tx, input_id).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Persists input-side links for a step attempt.
    pub async fn link_inputs(&self, step_id: i64, inputs: &[Node]) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;
        for input in inputs {
            link_node(&mut *tx, step_id, persisted_id(input)?, RelationshipType::Input).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_node(&self, id: i64) -> Result<Option<Node>, DatabaseError> {
        let sql = format!("SELECT {} FROM node WHERE id = ?1", NODE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    /// Fetches nodes by id, returned in the order of `ids`.
    ///
    /// Duplicate ids are allowed. A missing id is an error.
    pub async fn fetch_nodes(&self, ids: &[i64]) -> Result<Vec<Node>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM node WHERE id IN (", NODE_COLUMNS));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(self.pool()).await?;
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node = node_from_row(row)?;
            if let Some(id) = node.id {
                by_id.insert(id, node);
            }
        }

        ids.iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .ok_or_else(|| DatabaseError::NotFound(format!("node {}", id)))
            })
            .collect()
    }

    /// Nodes linked to a step on the given side, in id order.
    pub async fn step_nodes(
        &self,
        step_id: i64,
        relationship: RelationshipType,
    ) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM node
             JOIN step_node ON step_node.node_id = node.id
             WHERE step_node.step_id = ?1 AND step_node.relationship_type = ?2
             ORDER BY node.id",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(step_id)
            .bind(relationship.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    /// Input-linked nodes of a step that were not yet folded forward.
    pub async fn pending_step_inputs(&self, step_id: i64) -> Result<Vec<Node>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM node
             JOIN step_node ON step_node.node_id = node.id
             WHERE step_node.step_id = ?1 AND step_node.relationship_type = 'input'
               AND node.status = ?2
             ORDER BY node.id",
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(step_id)
            .bind(NodeStatus::Pending.as_str())
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    pub async fn count_step_links(
        &self,
        step_id: i64,
        relationship: RelationshipType,
    ) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM step_node WHERE step_id = ?1 AND relationship_type = ?2",
        )
        .bind(step_id)
        .bind(relationship.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewStep;
    use crate::storage::database::test_support::temp_database;

    async fn setup(db: &Database) -> Vec<Step> {
        let steps = vec![
            NewStep {
                step_type: "split".to_string(),
                method: "chunk".to_string(),
                name: "split_chunk".to_string(),
                config: serde_json::json!({}),
            },
            NewStep {
                step_type: "generation".to_string(),
                method: "llm".to_string(),
                name: "generation_llm".to_string(),
                config: serde_json::json!({}),
            },
        ];
        let (_, steps) = db
            .create_run(&serde_json::json!({}), &steps)
            .await
            .unwrap();
        steps
    }

    #[tokio::test]
    async fn test_source_nodes_seed_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;

        let mut nodes = vec![Node::new("first"), Node::new("second")];
        db.persist_source_nodes(&mut nodes).await.unwrap();

        for node in &nodes {
            let id = node.id.unwrap();
            assert_eq!(node.ancestors.get(SOURCE_LINEAGE_KEY), Some(&id));
            let stored = db.get_node(id).await.unwrap().unwrap();
            assert_eq!(stored.ancestors, node.ancestors);
        }
    }

    #[tokio::test]
    async fn test_lineage_grows_by_one_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;
        let steps = setup(&db).await;

        let mut source = vec![Node::new("some long text")];
        db.persist_source_nodes(&mut source).await.unwrap();

        let mut chunks = vec![
            Node::derived_from(&source[0], "some "),
            Node::derived_from(&source[0], "long text"),
        ];
        db.create_with_lineage(&steps[0], &source, &mut chunks)
            .await
            .unwrap();

        for chunk in &chunks {
            let mut expected = source[0].ancestors.clone();
            expected.insert("split_chunk".to_string(), chunk.id.unwrap());
            assert_eq!(chunk.ancestors, expected);
            assert_eq!(chunk.ancestors.len(), source[0].ancestors.len() + 1);
        }

        let mut generated = vec![Node::derived_from(&chunks[1], "generated")];
        db.create_with_lineage(&steps[1], &chunks[1..], &mut generated)
            .await
            .unwrap();
        assert_eq!(generated[0].ancestors.len(), 3);
        assert_eq!(
            generated[0].ancestors.get("split_chunk"),
            Some(&chunks[1].id.unwrap())
        );

        let source_after = db.get_node(source[0].id.unwrap()).await.unwrap().unwrap();
        assert_eq!(source_after.status, NodeStatus::Processed);
        let untouched = db.get_node(chunks[0].id.unwrap()).await.unwrap().unwrap();
        assert_eq!(untouched.status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn test_output_without_parent_starts_own_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;
        let steps = setup(&db).await;

        let mut source = vec![Node::new("seed")];
        db.persist_source_nodes(&mut source).await.unwrap();

        let mut outputs = vec![Node::new("synthetic variant")];
        db.create_with_lineage(&steps[0], &source, &mut outputs)
            .await
            .unwrap();

        let id = outputs[0].id.unwrap();
        assert_eq!(outputs[0].ancestors.len(), 1);
        assert_eq!(outputs[0].ancestors.get("split_chunk"), Some(&id));
        assert_eq!(
            db.count_step_links(steps[0].id, RelationshipType::Output)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_nodes_preserves_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;

        let mut nodes = vec![Node::new("a"), Node::new("b"), Node::new("c")];
        db.persist_source_nodes(&mut nodes).await.unwrap();
        let ids: Vec<i64> = nodes.iter().rev().map(|n| n.id.unwrap()).collect();

        let fetched = db.fetch_nodes(&ids).await.unwrap();
        let values: Vec<&str> = fetched.iter().map(|n| n.value.as_str()).collect();
        assert_eq!(values, vec!["c", "b", "a"]);

        assert!(matches!(
            db.fetch_nodes(&[9999]).await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_during_execution_then_completion_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;
        let steps = setup(&db).await;

        let mut source = vec![Node::new("one"), Node::new("two")];
        db.persist_source_nodes(&mut source).await.unwrap();

        let mut first = Node::derived_from(&source[0], "ONE");
        db.save_during_execution(&steps[0], &source[0], &mut first)
            .await
            .unwrap();
        assert!(first.is_persisted());

        let pending = db.pending_step_inputs(steps[0].id).await.unwrap();
        assert!(pending.is_empty(), "only the folded input is linked");

        let mut outputs = vec![first.clone(), Node::derived_from(&source[1], "TWO")];
        db.create_with_lineage(&steps[0], &source, &mut outputs)
            .await
            .unwrap();

        assert_eq!(outputs[0].id, first.id);
        let linked = db
            .step_nodes(steps[0].id, RelationshipType::Output)
            .await
            .unwrap();
        assert_eq!(linked.len(), 2);
        assert_eq!(
            db.count_step_links(steps[0].id, RelationshipType::Input)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_ablated_nodes_remain_fetchable() {
        let dir = tempfile::tempdir().unwrap();
        let db = temp_database(&dir).await;
        let steps = setup(&db).await;

        let mut source = vec![Node::new("keep"), Node::new("drop")];
        db.persist_source_nodes(&mut source).await.unwrap();

        let mut outputs = vec![
            Node::derived_from(&source[0], "keep"),
            Node::derived_from(&source[1], "drop").with_ablated(true),
        ];
        db.create_with_lineage(&steps[0], &source, &mut outputs)
            .await
            .unwrap();

        let stored = db.get_node(outputs[1].id.unwrap()).await.unwrap().unwrap();
        assert!(stored.ablated);
    }
}
