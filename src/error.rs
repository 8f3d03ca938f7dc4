//! Error types shared by every stage of trajectory generation.

use std::fmt;
use std::io;
use std::process::ExitStatus;

/// Why a call to the external word generator did not produce trajectories.
#[derive(Debug)]
pub enum GenerationFailure {
    /// The executable could not be spawned.
    NotFound { program: String, source: io::Error },
    /// The process ran but reported failure.
    NonZeroExit { status: ExitStatus, stderr: String },
    /// The output could not be parsed, even after repair.
    Unparsable { reason: String },
    /// The process did not finish within the configured timeout.
    TimedOut { seconds: f64 },
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationFailure::NotFound { program, source } => {
                write!(f, "could not run `{}`: {}", program, source)
            }
            GenerationFailure::NonZeroExit { status, stderr } => {
                write!(f, "word generator exited with {}", status)?;
                if !stderr.trim().is_empty() {
                    write!(f, ": {}", stderr.trim())?;
                }
                Ok(())
            }
            GenerationFailure::Unparsable { reason } => {
                write!(f, "unparsable word generator output: {}", reason)
            }
            GenerationFailure::TimedOut { seconds } => {
                write!(f, "word generator timed out after {:.1}s", seconds)
            }
        }
    }
}

/// Error type for trajectory generation.
#[derive(Debug)]
pub enum Error {
    /// Sampler given a non-interior start point, or an empty/unbounded region.
    InvalidRegion(String),
    /// Guard is not a conjunction of linear comparisons.
    UnsupportedGuard { guard: String, reason: String },
    /// A transition whose guard could not be abstracted.
    DanglingTransition { label: String, source: Box<Error> },
    /// The external word generator failed.
    GenerationFailed(GenerationFailure),
    /// A postponement for this post-label is still pending.
    UnresolvedPostpone { post_label: String, action: String },
    /// A release step with no pending postponement.
    MissingPostpone { post_label: String, action: String },
    /// Label with neither an abstraction nor a fixed-values entry.
    UnknownLabel(String),
    /// Automaton build-phase invariant violated.
    InvalidAutomaton(String),
    /// Abstract trajectory is not well-formed.
    MalformedTrajectory { trajectory: usize, step: usize, reason: String },
    /// File I/O error.
    Io(io::Error),
    /// JSON (de)serialization error.
    Json(serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<GenerationFailure> for Error {
    fn from(e: GenerationFailure) -> Self {
        Error::GenerationFailed(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRegion(msg) => write!(f, "invalid region: {}", msg),
            Error::UnsupportedGuard { guard, reason } => {
                write!(f, "unsupported guard `{}`: {}", guard, reason)
            }
            Error::DanglingTransition { label, source } => {
                write!(f, "transition `{}` cannot be abstracted: {}", label, source)
            }
            Error::GenerationFailed(e) => write!(f, "generation failed: {}", e),
            Error::UnresolvedPostpone { post_label, action } => write!(
                f,
                "step `{}` postpones `{}` while a previous postponement is unresolved",
                action, post_label
            ),
            Error::MissingPostpone { post_label, action } => write!(
                f,
                "step `{}` releases `{}` but nothing was postponed",
                action, post_label
            ),
            Error::UnknownLabel(label) => write!(f, "unknown label `{}`", label),
            Error::InvalidAutomaton(msg) => write!(f, "invalid automaton: {}", msg),
            Error::MalformedTrajectory { trajectory, step, reason } => write!(
                f,
                "malformed abstract trajectory #{} at step {}: {}",
                trajectory, step, reason
            ),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DanglingTransition { source, .. } => Some(source.as_ref()),
            Error::GenerationFailed(GenerationFailure::NotFound { source, .. }) => Some(source),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}
