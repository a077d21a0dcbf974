//! Autoneg Controller Library
//!
//! Registers the Network Endpoint Groups of annotated Kubernetes Services as
//! backends of Google Cloud load balancer backend services.
//! Tests are included in the module files and under `tests/`.

pub mod autoneg;
pub mod config;
pub mod constants;
pub mod controller;
pub mod gcp;
pub mod observability;
pub mod server;
