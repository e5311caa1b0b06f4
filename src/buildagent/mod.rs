pub mod agent;
pub mod client;
pub mod kaniko;
pub mod protocol;

pub use agent::BuildAgent;
pub use client::{ActionResult, BuildAgentClient};
