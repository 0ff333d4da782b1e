//! Application-level orchestration.
//!
//! This module owns the pipeline run: address resolution, liveness gating, ordered
//! dispatch to the extraction and inference services, and the merge step in between.
//! CLI layers call into this module and only render what it reports.

mod router;

pub use router::{Router, RouterError};
