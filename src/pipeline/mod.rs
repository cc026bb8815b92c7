//! Capture-to-publish pipeline
//!
//! The orchestrator owns the collaborators behind the traits in `traits`,
//! drives them through the lifecycle in `session`, and routes every encoded
//! unit through `router` to the live transport and, while recording, to a
//! local container.

mod events;
mod orchestrator;
mod router;
mod session;
mod traits;

pub use events::{ConnectionReporter, PipelineEvent, EVENT_CAPACITY};
pub use orchestrator::{OrchestratorBuilder, PipelineOrchestrator};
pub use router::{Router, TrackFormats};
pub use session::{PipelineState, SessionSnapshot};
pub use traits::{
    switch_or_restore, CaptureSource, ContainerWriter, ContainerWriterFactory, Credentials,
    Encoder, EncoderOutput, OpenRequest, RawInput, TransportSink,
};

#[cfg(test)]
mod tests;
