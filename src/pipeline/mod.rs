// Ingestion pipeline: processing stages, storage, and the per-source orchestrator

pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use orchestrator::{
    candidate_urls, IngestPipeline, RunSummary, SourceFailure, SourceOutcome, SourceRunSummary,
};
