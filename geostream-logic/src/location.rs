use std::fmt;

use serde::{Deserialize, Serialize};

/// A "part" of a coordinate
pub type LocationComponent = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// A single fix as reported by the platform's location provider
pub struct Coordinate {
    /// Latitude in degrees
    pub latitude: LocationComponent,
    /// Longitude in degrees
    pub longitude: LocationComponent,
}

impl Coordinate {
    pub const fn new(latitude: LocationComponent, longitude: LocationComponent) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
/// Permission grant level the platform currently reports for location access
pub enum AuthorizationStatus {
    /// The user has not been asked yet
    #[default]
    NotDetermined,
    /// The user refused access
    Denied,
    /// Access is blocked by something the user can't change (parental controls, MDM, etc.)
    Restricted,
    /// Access granted only while the app is in the foreground
    AuthorizedWhenInUse,
    /// Access granted at all times
    AuthorizedAlways,
}

impl AuthorizationStatus {
    /// Whether this status grants any level of location access
    pub fn grants_access(self) -> bool {
        matches!(self, Self::AuthorizedWhenInUse | Self::AuthorizedAlways)
    }

    /// Whether this status is final, meaning the user can no longer be prompted
    pub fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotDetermined => "not determined",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::AuthorizedWhenInUse => "authorized when in use",
            Self::AuthorizedAlways => "authorized always",
        };
        f.write_str(name)
    }
}
