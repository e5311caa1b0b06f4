use thiserror::Error;

/// Operator error type shared by both reconcilers.
///
/// The split matters for requeue behavior: `Kube` errors are transient and
/// re-enqueued with backoff, while `Validation` errors are terminal until the
/// spec changes and are surfaced as status conditions plus Events instead of
/// hot-looping.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid spec: {0}")]
    Validation(String),

    #[error("missing referenced resource: {0}")]
    MissingReference(String),

    #[error("{kind} \"{name}\" exists but is not owned by this resource")]
    OwnershipConflict { kind: String, name: String },

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// True for errors that should not be retried until the spec changes
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::MissingReference(_) | Error::OwnershipConflict { .. }
        )
    }

    /// CamelCase token used as the condition/Event reason
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) => "ApiError",
            Error::Serialization(_) => "SerializationError",
            Error::Validation(_) => "InvalidSpec",
            Error::MissingReference(_) => "MissingReference",
            Error::OwnershipConflict { .. } => "OwnershipConflict",
            Error::Finalizer(_) => "FinalizerError",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(Error::Validation("bad".into()).is_terminal());
        assert!(Error::MissingReference("gone".into()).is_terminal());
        assert!(Error::OwnershipConflict {
            kind: "Service".into(),
            name: "demo".into(),
        }
        .is_terminal());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!Error::Serialization(json_err).is_terminal());
    }

    #[test]
    fn test_reasons_are_camel_case_tokens() {
        let errors = [
            Error::Validation("x".into()),
            Error::MissingReference("x".into()),
            Error::OwnershipConflict {
                kind: "Deployment".into(),
                name: "x".into(),
            },
        ];
        for error in errors {
            let reason = error.reason();
            assert!(reason.chars().next().unwrap().is_ascii_uppercase());
            assert!(reason.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
