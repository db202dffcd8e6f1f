//! URL handling module for Meander
//!
//! This module provides the frontier's URL normalization, registrable-domain
//! resolution for Site records, and the domain/origin predicates used by link
//! admission filters.

mod domain;
mod normalize;

pub use domain::{
    extract_domain, matches_domain_pattern, registrable_domain, same_origin,
};
pub use normalize::{normalize_url, slash_variants};
