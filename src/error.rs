use thiserror::Error;

/// Failures of a center-of-mass recomputation or a mass metadata edit.
///
/// None of these leave the scene partially updated: every variant is raised
/// before the marker, the cursor or any metadata is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComError {
    #[error("total active mass is zero or not finite ({total_mass})")]
    ZeroMass { total_mass: f64 },
    #[error("no center of mass marker configured")]
    MissingMarker,
    #[error("no mass collection configured")]
    MissingGroup,
    #[error("unknown object '{0}'")]
    UnknownObject(String),
    #[error("unknown collection '{0}'")]
    UnknownGroup(String),
    #[error("density must be positive and finite, got {0}")]
    InvalidDensity(f64),
    #[error("volume must be non-negative and finite, got {0}")]
    InvalidVolume(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("continuous update is already running")]
    AlreadyRunning,
    #[error("update interval must be at least one millisecond")]
    InvalidInterval,
    #[error("no tokio runtime available to drive the update timer")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Com(#[from] ComError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
