//! Wire models

pub mod deployment;
