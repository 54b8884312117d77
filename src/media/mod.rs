pub mod extractor;
pub mod host_profile;
pub mod model;

pub use extractor::{extract, extract_match};
pub use host_profile::{HeaderContext, HostMatcher, HostProfile, HostRegistry};
pub use model::*;
