//! CLI modules for key files and engine commands

pub mod commands;
pub mod key_manager;

pub use commands::*;
pub use key_manager::KeyManager;
