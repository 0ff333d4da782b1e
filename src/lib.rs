//! Drives the extraction and inference services through one training run.
//!
//! [`orchestrator::Router`] owns the run; the other modules load its inputs and render its
//! outcome for the `extraction-router` binary.

pub mod cli;
pub mod converter;
pub mod merger;
pub mod model;
pub mod orchestrator;
pub mod paths;
pub mod settings;
pub mod storage;
mod text_summary;
