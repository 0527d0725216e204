// src/model/mod.rs
// Containers composing modules into larger modules.

pub mod sequential;

pub use sequential::{Sequential, Stage};
