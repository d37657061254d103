//! pricewatch Library
//!
//! Polling price-quote collector: supervised per-job polling tasks feed a
//! partitioned fact log whose consumer maintains trailing moving averages.

pub mod average;
pub mod config;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod store;
pub mod types;
