//! Utility types and functions for Scenio.
//!
//! This module contains fundamental types used throughout the library:
//! - [`DataKind`] - Enum of storable entry kinds (scalar and array)
//! - [`IoData`] - Trait for typed entry encode/decode
//! - [`Error`] / [`Result`] - Error handling
//! - Math types ([`Box3d`] and glam re-exports)

mod pod;
mod error;
mod math;

pub use pod::*;
pub use error::*;
pub use math::*;
