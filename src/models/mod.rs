pub mod artifact;
pub mod event;

pub use artifact::{ArtifactStage, LocalArtifact, QuarantineEntry, QuarantineOrigin, RemoteObjectRef};
pub use event::{format_timestamp, parse_timestamp, EventRecord};
