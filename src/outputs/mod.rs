//! Output generation for harvested records.
//!
//! # Submodules
//!
//! - [`csv`]: writes a [`ResultSet`](crate::models::ResultSet) as one CSV row per target
//!
//! # Column Layout
//!
//! ```text
//! profile_url,scraped_at,name,headline,...,all_experience,all_education,<extras>
//! ```
//!
//! The schema columns always come first and are always present; `error` and any
//! columns a worker added on its own follow in first-seen order.

pub mod csv;
