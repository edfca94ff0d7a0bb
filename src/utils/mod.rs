//! The `utils` module provides the pieces shared by every stage of
//! `wis2files`: the error types and logging setup.

pub mod error;
pub mod logging;
