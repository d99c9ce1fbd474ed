
mod run;
mod config;
mod error;
mod logging;
mod monitor;
mod backend;
mod sparse;
mod normalize;
mod reduce;
mod store;
mod manifest;
mod pipeline;
mod similarity;

pub use run::Run;
pub use config::{BackendChoice, BatchParams, Config, FailurePolicy};
pub use error::{Error, Result, StorageError};
pub use logging::RunLog;
pub use monitor::{MemoryInfo, MemoryProbe, ResourceMonitor, SystemMemory};
pub use backend::{ComputeBackend, HostBackend, ParallelBackend};
pub use sparse::CsrMatrix;
pub use normalize::{inverse_document_frequency, Method, Normalizer};
pub use reduce::{Operator, Reducer, SvdSettings};
pub use store::{discover_inputs, read_input, save_output, InputMatrix, OutputNaming, ReadFile, SaveFile};
pub use manifest::{Manifest, ProcessingResult};
pub use pipeline::{BatchReport, CombinationFailure, Pipeline};
pub use similarity::Similarity;
