//! adaptive-rag - Adaptive Retrieval-Augmented Generation Orchestrator
//!
//! Routes a question through hybrid retrieval over a prebuilt document corpus,
//! falls back to web search when retrieval comes back empty, and generates an
//! answer, while streaming step-by-step progress to an observer and caching
//! each corpus's expensive setup across requests.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod grading;
pub mod graph;
pub mod llm;
pub mod progress;
pub mod retrieval;
pub mod service;
pub mod session;
pub mod storage;

pub use error::{RagError, Result};
