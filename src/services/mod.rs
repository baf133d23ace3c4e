/// Match engine driving phases, countdown, scoring and persistence.
pub mod engine;
/// Word validation pass-through.
pub mod validation;

pub use engine::MatchEngine;
