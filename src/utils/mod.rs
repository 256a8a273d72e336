pub mod checksum;
pub mod constants;
pub mod filename;
pub mod layout;
pub mod logging;
pub mod progress;

pub use checksum::file_sha256;
pub use constants::*;
pub use filename::{event_file_name, is_event_file, versioned_destination};
pub use layout::DataLayout;
pub use logging::init_logging;
pub use progress::ProgressReporter;
