//! # Thread Management
//!
//! Thread descriptors and their state vocabulary.

pub mod states;
pub mod thread;

pub use states::*;
pub use thread::*;
