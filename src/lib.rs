//! Lodestar - Access Control Authorization Engine
//!
//! This library provides the rule compiler and policy-decision evaluator for
//! the Lodestar authentication gateway. It exposes all modules for testing
//! purposes.

pub mod access;
pub mod errors;
pub mod settings;
