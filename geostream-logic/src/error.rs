use thiserror::Error;

/// Errors carried by location streams
///
/// Cloneable so a single provider failure can fan out to every active subscriber.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    /// The provider handle has been released, nothing can be requested from the platform
    #[error("location provider is unavailable")]
    PermissionUnavailable,
    /// The platform reported a failure while fetching a location, message is kept verbatim
    #[error("location provider failed: {0}")]
    Provider(String),
}
