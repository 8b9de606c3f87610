//! Data models for the database wrappers.
//!
//! This module contains all the data structures used for:
//! - Backend identification and connection keyword mappings
//! - Statement parameters and result sets

pub mod connection;
pub mod query;

pub use connection::{Backend, ConnectionKey, ConnectionParameters, ParamValue};
pub use query::{QueryParam, ResultSet};
