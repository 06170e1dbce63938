//! HomeLink Protocol - Core identifiers, traits, and constants.
//!
//! This module provides the foundational types shared by every layer and the
//! abstract interfaces the secure transport consumes from its environment.
//! It has no I/O dependencies.

mod constants;
mod error;
mod ids;
mod traits;

pub use constants::*;
pub use error::*;
pub use ids::*;
pub use traits::*;
