//! Configuration.
//!
//! - [`Settings`]: engine-wide settings read from the environment
//! - [`PipelineDefinition`]: the YAML pipeline file, parsed into a closed set
//!   of typed step variants and validated once before any run is created

mod definition;
mod settings;
mod steps;

pub use definition::{
    CsvInputProperties, CsvOutputProperties, InputConfig, OutputColumn, OutputConfig,
    PipelineDefinition,
};
pub use settings::Settings;
pub use steps::{
    AblationParameters, ChunkParameters, Consensus, DedupStrategy, EmbedParameters,
    GenerationParameters, Keep, SeparatorParameters, StepConfig, StepKind, TfIdfParameters,
    WordPositionParameters,
};
