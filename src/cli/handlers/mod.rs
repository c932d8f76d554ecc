// src/cli/handlers/mod.rs

//! One module per CLI action.

pub mod commons;
pub mod env;
pub mod exec;
pub mod layers;
pub mod run;
pub mod validate;
