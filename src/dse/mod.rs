pub mod controller;
pub mod models;
pub mod resources;
pub mod status;

pub use models::{DevStagingEnvironment, DevStagingEnvironmentSpec, DevStagingEnvironmentStatus};
