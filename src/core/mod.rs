// src/core/mod.rs

//! Workspace, policy and environment logic. Nothing in here spawns processes.

pub mod cache;
pub mod command_resolver;
pub mod config_loader;
pub mod dotenv;
pub mod layers;
pub mod paths;
pub mod policy;
pub mod validator;
