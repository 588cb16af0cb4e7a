//! Input and output collaborators of a run.
//!
//! Loaders produce the persisted source nodes a run starts from; savers
//! write the nodes surviving the last step.

mod input;
mod output;

pub use input::{build_input_loader, CsvInputLoader, InputLoader};
pub use output::{build_output_saver, CsvOutputSaver, OutputSaver};
