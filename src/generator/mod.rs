//! Post-process generators over a build's outputs.

pub mod sitemap;

pub use sitemap::{Sitemap, write_sitemap};
