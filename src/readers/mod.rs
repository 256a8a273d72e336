pub mod event_csv_reader;
pub mod glm_reader;
pub mod time_units;

pub use event_csv_reader::{CleanedEvents, EventCsvReader};
pub use glm_reader::{open_granule, EventColumns, EventDataset, NetcdfDataset, PackedVariable};
pub use time_units::{TimeUnit, TimeUnits};
