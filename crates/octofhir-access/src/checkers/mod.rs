//! Checkers shipped with this crate.
//!
//! - [`allow_all`] - `demo`: grants every request
//! - [`patient`] - `patient`: patient-scoped access from SMART scopes

pub mod allow_all;
pub mod patient;

pub use allow_all::{AllowAllAccessChecker, AllowAllCheckerFactory};
pub use patient::{PatientAccessChecker, PatientCheckerFactory};
