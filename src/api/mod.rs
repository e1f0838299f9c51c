pub mod adapter;
pub mod description;
pub mod registry;
pub mod watcher;

pub use adapter::JobFileAdapter;
pub use description::{Application, JobDescription, JobId, JobMetadata, JobResult, SatResult};
pub use registry::JobRegistry;
