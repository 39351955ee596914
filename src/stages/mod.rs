pub mod categorize;
pub mod enrich;
pub mod export;
pub mod ingest;
pub mod stats;
pub mod tag;
pub mod taxonomy;
pub mod verify;
