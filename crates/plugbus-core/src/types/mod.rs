//! Type system utilities and aliases.
//!
//! ## Modules
//!
//! - [`aliases`]: Type aliases for handler callbacks and scheduled tasks.

pub mod aliases;

pub use aliases::*;
