//! # Sanad Support
//!
//! Shared utilities for the Sanad resolution engine.
//!
//! This crate provides:
//! - Text rendering for dependency paths and error hints
//! - Prime sizing for the registry's hash tables

pub mod primes;
pub mod rendering;
