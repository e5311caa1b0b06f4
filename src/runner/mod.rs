pub mod controller;
pub mod deployment;
pub mod models;
pub mod rbac;

pub use models::{CIRunnerPool, CIRunnerPoolSpec, CIRunnerPoolStatus};
