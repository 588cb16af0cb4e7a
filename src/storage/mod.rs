//! SQLite persistent storage.
//!
//! # Overview
//!
//! The storage system consists of:
//! - **Database**: connection pool plus schema migrations
//! - **Node store**: nodes, their lineage maps and step/node links
//! - **State machine**: run and step status transitions and resume queries
//! - **Credential store**: model provider keys and URLs
//!
//! # Usage
//!
//! ```rust,ignore
//! use synda::storage::Database;
//!
//! let db = Database::open(Path::new("/home/me/.synda/synda.db")).await?;
//!
//! let (run, steps) = db.create_run(&snapshot, &new_steps).await?;
//! db.set_step_running(steps[0].id, &inputs, false).await?;
//! db.create_with_lineage(&steps[0], &inputs, &mut outputs).await?;
//! db.set_step_completed(steps[0].id).await?;
//! ```

pub mod database;
pub mod migrations;
mod nodes;
mod providers;
mod runs;
pub mod schema;

pub use database::{Database, DatabaseError};
pub use migrations::{MigrationError, MigrationRunner};
