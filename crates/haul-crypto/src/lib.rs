//! Hashing utilities for haul

pub mod hash;

pub use hash::*;
