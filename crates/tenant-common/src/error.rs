//! Error types for the tenant operator
//!
//! Errors are structured with fields to aid debugging in production. API
//! failures carry an [`ApiErrorKind`] that is derived from typed data only
//! (status codes, status reasons, io error kinds). Callers branch on the
//! classification predicates, never on message text.

use std::io;

use thiserror::Error;

/// Placeholder for errors raised without call-site or cluster context
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classification of a failed call against an object store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The addressed object does not exist
    NotFound,
    /// The object already exists (create conflict)
    AlreadyExists,
    /// The call timed out
    Timeout,
    /// The API server is not reachable or not serving yet
    Unavailable,
    /// Anything else: permission denied, malformed response, unexpected status
    Other,
}

impl ApiErrorKind {
    /// Whether this kind is an expected transient condition of a tenant
    /// cluster that is bootstrapping or draining
    pub fn is_transient(self) -> bool {
        matches!(self, ApiErrorKind::Timeout | ApiErrorKind::Unavailable)
    }
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::AlreadyExists => "already exists",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Unavailable => "api unavailable",
            ApiErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Errors raised while reconciling tenant clusters
#[derive(Debug, Error)]
pub enum Error {
    /// Failed call against a Kubernetes API server
    #[error("kubernetes error [{context}] ({kind}): {source}")]
    Kube {
        /// Call site description (e.g. "list configmaps in kube-system")
        context: String,
        /// Classification of the failure
        kind: ApiErrorKind,
        /// Error returned by kube
        #[source]
        source: kube::Error,
    },

    /// Failure reported by a non-Kubernetes store (Helm releases, chart transport)
    #[error("store error [{context}] ({kind}): {message}")]
    Store {
        /// Call site description
        context: String,
        /// Classification of the failure
        kind: ApiErrorKind,
        /// What failed
        message: String,
    },

    /// Cluster input that cannot be reconciled
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Cluster whose specification is invalid
        cluster: String,
        /// What is wrong with the input
        message: String,
        /// The invalid field path (e.g., "spec.workers.count")
        field: Option<String>,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {message}")]
    Serialization {
        /// What failed
        message: String,
        /// Resource kind of the payload, when known
        kind: Option<String>,
    },

    /// Operator-side failure not tied to an API call
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// What failed
        message: String,
        /// Context where the error occurred (e.g., "differ", "controller")
        context: String,
    },
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Self::Kube {
            context: UNKNOWN_CONTEXT.to_string(),
            kind: classify_kube_error(&source),
            source,
        }
    }
}

impl Error {
    /// Validation failure not yet attributed to a cluster
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Validation failure of one cluster
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Validation failure of one field of a cluster
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a classified store error
    pub fn store(
        context: impl Into<String>,
        kind: ApiErrorKind,
        msg: impl Into<String>,
    ) -> Self {
        Self::Store {
            context: context.into(),
            kind,
            message: msg.into(),
        }
    }

    /// Encoding failure of an unnamed payload
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Encoding failure of a payload of the given kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Operator-side failure without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Operator-side failure raised at `context`
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Attach call-site context, keeping the error's kind intact
    ///
    /// Existing context is kept as the inner part: `outer: inner`.
    pub fn with_context(self, outer: impl Into<String>) -> Self {
        let outer = outer.into();
        let join = |inner: String| {
            if inner == UNKNOWN_CONTEXT {
                outer.clone()
            } else {
                format!("{}: {}", outer, inner)
            }
        };
        match self {
            Error::Kube {
                context,
                kind,
                source,
            } => Error::Kube {
                context: join(context),
                kind,
                source,
            },
            Error::Store {
                context,
                kind,
                message,
            } => Error::Store {
                context: join(context),
                kind,
                message,
            },
            Error::Internal { message, context } => Error::Internal {
                message,
                context: join(context),
            },
            other => other,
        }
    }

    /// Attribute a validation error to a cluster if it has none yet
    pub fn in_cluster(self, cluster: impl Into<String>) -> Self {
        match self {
            Error::Validation {
                cluster: existing,
                message,
                field,
            } if existing == UNKNOWN_CONTEXT => Error::Validation {
                cluster: cluster.into(),
                message,
                field,
            },
            other => other,
        }
    }

    /// Classification of API and store failures; `None` for other variants
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Error::Kube { kind, .. } | Error::Store { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::NotFound)
    }

    /// A create call hit an existing object
    pub fn is_already_exists(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::AlreadyExists)
    }

    /// The call timed out
    pub fn is_timeout(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::Timeout)
    }

    /// The API server is not reachable or not yet serving
    pub fn is_api_unavailable(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::Unavailable)
    }

    /// Timeout or unavailability: resolved into cancellation, never surfaced
    pub fn is_transient(&self) -> bool {
        self.api_kind().is_some_and(ApiErrorKind::is_transient)
    }

    /// Check if the outer loop should retry this error
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { kind, source, .. } => match kind {
                ApiErrorKind::Other => !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                ),
                _ => true,
            },
            Error::Store { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Cluster a validation failure is attributed to
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Call-site context of API, store and internal failures
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Kube { context, .. } => Some(context),
            Error::Store { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Classify a kube-rs error from its typed contents
pub fn classify_kube_error(err: &kube::Error) -> ApiErrorKind {
    match err {
        kube::Error::Api(ae) => match (ae.code, ae.reason.as_str()) {
            (404, _) => ApiErrorKind::NotFound,
            (409, "AlreadyExists") => ApiErrorKind::AlreadyExists,
            (504, _) | (_, "Timeout") => ApiErrorKind::Timeout,
            (502, _) | (503, _) | (_, "ServiceUnavailable") => ApiErrorKind::Unavailable,
            _ => ApiErrorKind::Other,
        },
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            io_kind_in_chain(err).unwrap_or(ApiErrorKind::Unavailable)
        }
        other => io_kind_in_chain(other).unwrap_or(ApiErrorKind::Other),
    }
}

/// Walk the source chain looking for an io error that tells us whether the
/// endpoint timed out or refused/dropped the connection.
fn io_kind_in_chain(err: &(dyn std::error::Error + 'static)) -> Option<ApiErrorKind> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => Some(ApiErrorKind::Timeout),
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
                | io::ErrorKind::AddrNotAvailable => Some(ApiErrorKind::Unavailable),
                _ => None,
            };
        }
        current = e.source();
    }
    None
}
