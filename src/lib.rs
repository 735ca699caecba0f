//! Lead Score API Library
//!
//! This library provides the core functionality for the lead scoring
//! dashboard backend: upload parsing, the scoring engine, the AI bridge,
//! result reconciliation, dashboard aggregation and HTTP handlers.
//!
//! # Modules
//!
//! - `aggregation`: Stats, chart buckets, top-N, facets and filtering.
//! - `ai_bridge`: Scorer and text model traits, prompt and reply cleaning.
//! - `circuit_breaker`: Circuit breaker for model calls.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `gemini_client`: Generative Language API client.
//! - `handlers`: HTTP request handlers and routes.
//! - `ingest`: CSV / Excel upload parsing.
//! - `merge`: Joins AI results onto lead rows.
//! - `models`: Core data models.
//! - `outreach`: Engagement email generation.
//! - `pipeline`: Upload barrier and scoring cycle.
//! - `scoring`: Deterministic lead scoring engine.
//! - `store`: Checksummed handoff store.

pub mod aggregation;
pub mod ai_bridge;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod gemini_client;
pub mod handlers;
pub mod ingest;
pub mod merge;
pub mod models;
pub mod outreach;
pub mod pipeline;
pub mod scoring;
pub mod store;
