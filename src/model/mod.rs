//! Data model types.

pub mod types;
