pub mod extractor;
pub mod loader;
pub mod transformer;

pub use extractor::{ExtractFailure, ExtractOutcome, ExtractReport, Extractor};
pub use loader::{LoadReport, Loader};
pub use transformer::{TransformFailure, TransformReport, Transformer};
