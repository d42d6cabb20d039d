//! External enrichment service contracts: translation and reply suggestions.

pub mod suggestion;
pub mod translation;
