pub mod enrich_service;
pub mod extract_service;

pub use enrich_service::{EnrichReport, EnrichService};
pub use extract_service::TextExtractor;
