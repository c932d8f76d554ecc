//! # System Interaction Layer
//!
//! Everything that touches processes, ports and the terminal.
//!
//! ## Modules
//!
//! - **`executor`**: Prepares the environment for a command (validation,
//!   layering, required variables, ports), spawns it through the platform
//!   shell and drives the timeout and auto-fix retry loop.
//! - **`process_registry`**: Tracks spawned children and kills them all on
//!   `Ctrl+C`, `SIGTERM` or normal exit.
//! - **`ports`**: Finds and stops the owners of busy ports.
//! - **`autofix`**: The ordered table of recognized failure classes.
//! - **`prompt`**: Non-blocking yes/no confirmations.

pub mod autofix;
pub mod executor;
pub mod ports;
pub mod process_registry;
pub mod prompt;
