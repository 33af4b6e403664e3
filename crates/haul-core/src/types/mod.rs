//! Core types for haul

mod acl;
mod chunk;
mod session;

pub use acl::*;
pub use chunk::*;
pub use session::*;
