//! Integration tests for layerbom
//!
//! Every test drives the real pipeline against an in-memory registry, so no
//! network or container engine is needed.

pub mod common;
pub mod pipeline;
pub mod sbom;
