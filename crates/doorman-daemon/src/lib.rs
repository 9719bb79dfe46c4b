//! Library half of the access gate daemon.
//!
//! Holds the HTTP ingress that receives channel events and hands their
//! payloads to the core pipeline. Configuration loading, logging setup
//! and process lifecycle live in the binary.

#![deny(unsafe_code)]

pub mod ingress;

pub use ingress::{IngressError, IngressState, SharedIngressState, router};
