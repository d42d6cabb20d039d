//! The conversation-assist pipeline: types, bounded history, the
//! enrichment orchestrator, and the top-level supervisor.

pub mod history;
pub mod orchestrator;
pub mod supervisor;
pub mod types;

pub use orchestrator::Orchestrator;
pub use supervisor::PipelineSupervisor;
