//! Commit validator: a pure pipeline over `(repo_diff, loaded_tasks,
//! parsed_provenance_trailers, config)` producing every failure, never
//! short-circuiting after the first.

pub mod pipeline;

pub use pipeline::{CommitValidator, ProvenanceTrailers, Severity, ValidationFailure, ValidationInput};
