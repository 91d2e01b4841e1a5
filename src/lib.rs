#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::struct_field_names
)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod narrative;
pub mod providers;
pub mod session;
pub mod speech;

pub use config::Config;
pub use error::{GizmoError, Result};
