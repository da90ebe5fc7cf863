//! HTTP communication with the build service

pub mod client;
pub mod deployments;
