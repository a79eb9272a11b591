//! PAS Core - Shared functionality for all PAS tools
//!
//! Every tool in the toolkit resolves its files through [`Paths`] and
//! renders ages and secrets through [`format`].

pub mod format;
pub mod paths;

pub use paths::Paths;
