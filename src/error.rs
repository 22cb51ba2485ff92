//! Error types for the machine lifecycle controller core.
//!
//! Variants map 1:1 onto spec.md §7's error kinds: `NotFound` is benign at
//! the top of a reconcile (callers special-case it into a no-op before it
//! ever reaches a caller that only sees `Result`), `Conflict`/`Io` are
//! retriable, `Parse`/`FatalConfig` are not.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },

    #[error("optimistic concurrency conflict: {0}")]
    Conflict(#[source] kube::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("object store I/O error: {0}")]
    Io(#[source] kube::Error),

    #[error("invalid configuration: {0}")]
    FatalConfig(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl Error {
    /// Classification used by the scheduler shell (spec.md §4.7) to decide
    /// between a rate-limited retry and giving up on this reconcile outright.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Conflict(_) | Error::Io(_) | Error::Kube(_) => true,
            Error::Aggregate(agg) => agg.is_retriable(),
            Error::NotFound { .. } | Error::Parse(_) | Error::FatalConfig(_) => false,
        }
    }

    /// Classify a raw `kube::Error` into the retriable/non-retriable buckets
    /// spec.md §7 describes: a 409 response is a CAS conflict, anything else
    /// reaching the object store is transient I/O.
    pub fn from_kube(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(err),
            _ => Error::Io(err),
        }
    }

    /// Label used by the metrics `kind` dimension (controller::metrics).
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Parse(_) => "parse",
            Error::Io(_) => "io",
            Error::FatalConfig(_) => "fatal_config",
            Error::Kube(_) => "kube",
            Error::Aggregate(_) => "aggregate",
        }
    }
}

/// Collects per-target remediation failures during one reconcile so as many
/// targets as possible are processed per cycle (spec.md §7 "Propagation
/// policy"). Constructed empty, appended to, and converted to a `Result<()>`
/// at the end of the reconcile.
#[derive(Debug, Default)]
pub struct AggregateError(pub Vec<Error>);

impl AggregateError {
    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_retriable(&self) -> bool {
        self.0.iter().any(Error::is_retriable)
    }

    /// Collapse back to `Ok(())` if nothing was collected.
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} target(s) failed: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

pub type Result<T> = std::result::Result<T, Error>;
