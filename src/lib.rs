//! `dx`: runs commands inside a layered, policy-checked environment.

pub mod cli;
pub mod constants;
pub mod core;
pub mod dev_utils;
pub mod models;
pub mod state;
pub mod system;
