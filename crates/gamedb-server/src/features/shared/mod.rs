//! Helpers shared by the feature slices

pub mod validation;
