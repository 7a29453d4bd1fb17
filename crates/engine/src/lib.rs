//! Storyforge Engine library.
//!
//! Coordinates the generation pipeline over a persisted [`storyforge_domain::Game`]
//! aggregate: the stage scheduler with resumption, the fan-out/fan-in stage
//! executor, the nine stage handlers, and the abstract ports the surrounding
//! application plugs concrete stores and generation providers into.

pub mod config;
pub mod infrastructure;
pub mod pipeline;
pub mod stages;

pub use config::PipelineConfig;
pub use pipeline::scheduler::GamePipeline;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Embedding applications that bring their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyforge_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
