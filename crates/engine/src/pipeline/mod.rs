//! The sequential stage pipeline: contracts, the bounded fan-out executor,
//! and the scheduler that drives a game through every stage.

pub mod fanout;
pub mod scheduler;
pub mod stage;

pub use fanout::{fan_out, FanOutReport};
pub use scheduler::GamePipeline;
pub use stage::{PipelineError, Stage, StageDescriptor, StageOutcome};
