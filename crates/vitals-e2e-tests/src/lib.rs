//! End-to-end integration tests for the building vitals service.
//!
//! These tests exercise the full stack:
//! - Ingestion from a paginated source into the hot store
//! - Compression, cold export and retention over simulated weeks
//! - Tiered queries through the router and the HTTP API

#![cfg(test)]
