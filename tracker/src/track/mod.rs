//! Deployment status tracking

pub mod classify;
pub mod controller;
pub mod events;
pub mod fsm;
