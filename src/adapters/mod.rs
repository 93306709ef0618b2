//! Endpoint adapters for concrete storage backends.
//!
//! - [`memory`] - In-memory endpoint for tests and local development
//! - [`s3`] - S3-compatible services via the official AWS SDK

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "s3")]
pub mod s3;
