//! The vulnerabilities module contains what's needed to get the CVEs
//! matching a query.
//!
//! It is composed of two parts, fetchers and normalization.
//! A fetcher is there to fetch the vulnerabilities from a source (e.g. NVD).
//! The normalization turns what the source returned into flat records and
//! filters them.

pub mod fetchers;
pub mod normalize;
