pub mod mover;
pub mod quarantine;
pub mod staging;

pub use mover::{move_file, move_versioned};
pub use quarantine::Quarantine;
pub use staging::{StagingLock, StagingOwner};
