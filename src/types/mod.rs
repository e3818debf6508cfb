//! Type system module for Lume.

pub mod signature;

pub use signature::{FunctionSignature, TypeKind, TypeSignature};
