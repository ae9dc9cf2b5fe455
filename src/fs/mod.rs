//! File system and prefix listing module
//!
//! Lazy, restartable enumeration of local trees and remote key prefixes.

mod lister;

pub use lister::*;
