#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models, wire types, and error taxonomy for the pagegen engine.

pub mod api;
pub mod error;
pub mod ids;
pub mod model;

mod util;

pub use util::{new_ulid, now_ms};
