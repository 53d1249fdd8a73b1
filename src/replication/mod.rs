pub mod catalog;
pub mod copier;
pub mod orchestrator;
pub mod resolver;
pub mod strategy;

#[cfg(test)]
pub mod testing;

pub use catalog::{CatalogSearchOutcome, search_all_accounts};
pub use copier::PackageDimensions;
pub use orchestrator::{EngineError, Orchestrator, fanout_concurrency_from_env};
