use thiserror::Error;

/// Errors raised while building a [`MultiBody`](crate::MultiBody) or a
/// [`Robot`](crate::Robot). These are fatal: no solver is created.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read urdf: {0}")]
    Urdf(#[from] urdf_rs::UrdfError),

    #[error("robot {robot} has no root link")]
    NoRoot { robot: String },

    #[error("robot {robot} has more than one root link: {roots:?}")]
    MultipleRoots { robot: String, roots: Vec<String> },

    #[error("link {name} not found")]
    LinkNotFound { name: String },

    #[error("tip link {tip} is not below base link {base}")]
    NotDescendant { base: String, tip: String },

    #[error("no tip links requested")]
    NoTips,

    #[error("no active joints between {base} and the requested tips")]
    NoActiveJoints { base: String },
}

/// Malformed requests rejected by the solver before any search starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("no target poses given")]
    EmptyPoses,

    #[error("expected {expected} target poses (one per tip), got {actual}")]
    PoseCount { expected: usize, actual: usize },

    #[error("expected {expected} joint values, got {actual}")]
    JointCount { expected: usize, actual: usize },

    #[error("link {name} is not part of the controlled chain")]
    UnknownLink { name: String },
}
