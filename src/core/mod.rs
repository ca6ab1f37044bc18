//! Core engine: BFS tracer and risk scorer

pub mod scorer;
pub mod tracer;

pub use tracer::Tracer;
