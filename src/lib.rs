//! Satisfaction statistics for course surveys: sanitising raw answers,
//! folding real and test responses into weighted metrics, and rolling them
//! up into summaries, trends, course breakdowns and rating bands.

pub mod config;
pub mod course;
pub mod db;
pub mod distribution;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod paging;
pub mod question;
pub mod report;
pub mod rollup;
pub mod sanitize;
pub mod source;
pub mod weighted;
