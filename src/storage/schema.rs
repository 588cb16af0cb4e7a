//! Database schema constants.
//!
//! This module contains the SQLite schema for runs, steps, nodes, the
//! step/node link table and the provider credential store.

/// SQL schema for creating the run table.
pub const CREATE_RUN_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    status      TEXT    NOT NULL,
    config      TEXT    NOT NULL,
    created_at  TEXT    NOT NULL
)
"#;

/// SQL schema for creating the step table.
pub const CREATE_STEP_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS step (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id      INTEGER NOT NULL REFERENCES run(id),
    position    INTEGER NOT NULL,
    type        TEXT    NOT NULL,
    method      TEXT    NOT NULL,
    name        TEXT    NOT NULL,
    config      TEXT    NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'pending',
    run_at      TEXT,
    UNIQUE(run_id, position)
)
"#;

/// SQL schema for creating the node table.
pub const CREATE_NODE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS node (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_node_id  INTEGER REFERENCES node(id),
    ablated         INTEGER NOT NULL DEFAULT 0,
    value           TEXT    NOT NULL,
    ancestors       TEXT    NOT NULL DEFAULT '{}',
    status          TEXT    NOT NULL DEFAULT 'pending',
    metadata        TEXT    NOT NULL DEFAULT '[]'
)
"#;

/// SQL schema for the many-to-many link between steps and nodes.
pub const CREATE_STEP_NODE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS step_node (
    step_id             INTEGER NOT NULL REFERENCES step(id),
    node_id             INTEGER NOT NULL REFERENCES node(id),
    relationship_type   TEXT    NOT NULL,
    PRIMARY KEY (step_id, node_id, relationship_type)
)
"#;

/// SQL schema for the provider credential store.
pub const CREATE_PROVIDER_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS provider (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL UNIQUE,
    api_key     TEXT    NOT NULL,
    api_url     TEXT
)
"#;

/// SQL for creating indexes.
pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_step_run_id ON step(run_id);
CREATE INDEX IF NOT EXISTS idx_step_status ON step(status);
CREATE INDEX IF NOT EXISTS idx_step_node_node_id ON step_node(node_id);
CREATE INDEX IF NOT EXISTS idx_node_parent_node_id ON node(parent_node_id)
"#;

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_RUN_TABLE,
        CREATE_STEP_TABLE,
        CREATE_NODE_TABLE,
        CREATE_STEP_NODE_TABLE,
        CREATE_PROVIDER_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const RUN: &str = "run";
    pub const STEP: &str = "step";
    pub const NODE: &str = "node";
    pub const STEP_NODE: &str = "step_node";
    pub const PROVIDER: &str = "provider";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 6);
        // run must exist before step references it
        assert!(statements[0].contains(tables::RUN));
        assert!(statements[3].contains(tables::STEP_NODE));
        assert!(statements[5].contains("CREATE INDEX"));
    }

    #[test]
    fn test_step_positions_unique_per_run() {
        assert!(CREATE_STEP_TABLE.contains("UNIQUE(run_id, position)"));
        assert!(CREATE_STEP_NODE_TABLE.contains("PRIMARY KEY (step_id, node_id, relationship_type)"));
    }
}
