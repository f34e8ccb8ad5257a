pub mod api;
pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod paginate;
pub mod sampling;
pub mod xref;
