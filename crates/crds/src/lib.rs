//! DCops CRD Definitions
//!
//! Kubernetes type definitions consumed by DCops controllers. The machine
//! API types are owned by the machine-lifecycle system; controllers in this
//! workspace only read them.

pub mod machine;

pub use machine::*;
