//! Canonicalization transforms problems into standard conic form.
//!
//! This module exports a problem as `h - G x ∈ K` blocks per cone family,
//! keeps track of where each constraint's rows landed, and maps solver
//! duals back onto constraints.

pub mod conic;

pub use conic::{CanonicalForm, ConeBlock, ConstraintRows, FamilyDuals, RowSpan};
