#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! HTTP implementation of the pagegen generation-backend contract.

mod client;

pub use client::HttpBackend;
