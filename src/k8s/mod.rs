pub mod apply;
pub mod client;
pub mod events;
pub mod hash;
pub mod naming;
pub mod probes;

/// Field manager used for all server-side apply patches
pub const FIELD_MANAGER: &str = "kindling-operator";

/// Annotation carrying the 16-hex-char fingerprint of the reconciliation
/// inputs on every owned resource
pub const SPEC_HASH_ANNOTATION: &str = "kindling.dev/spec-hash";

/// Annotation carrying the runner pool fingerprint (spec + provider name +
/// startup script text)
pub const RUNNER_POOL_HASH_ANNOTATION: &str = "kindling.dev/runner-pool-spec-hash";
