//! Low-level primitives shared by the key codec and the store adapters.

/// Order-preserving byte encoders and key-range helpers.
pub mod bytes;
