//! Backend access.
//!
//! - `DataSource`: the async collaborator the data layer fetches through
//! - `HttpSource`: `DataSource` over the backend's REST endpoints, with
//!   retries for transient failures
//! - `ApiError`: failures mapped from HTTP status codes

pub mod client;
pub mod error;
pub mod source;

pub use client::HttpSource;
pub use error::ApiError;
pub use source::DataSource;
