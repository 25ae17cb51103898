use serde::{Deserialize, Serialize};

use crate::location::AuthorizationStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Which authorization statuses count as "authorized" for [crate::GeolocationService::is_authorized_stream]
pub enum AuthorizationPolicy {
    /// Only [AuthorizationStatus::AuthorizedAlways] counts, "when in use" is treated as unauthorized
    #[default]
    AlwaysOnly,
    /// Both "when in use" and "always" count
    WhenInUseOrAlways,
}

impl AuthorizationPolicy {
    pub fn is_authorized(self, status: AuthorizationStatus) -> bool {
        match self {
            Self::AlwaysOnly => status == AuthorizationStatus::AuthorizedAlways,
            Self::WhenInUseOrAlways => status.grants_access(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Accuracy the provider should aim for, coarser settings let the platform save power
pub enum Accuracy {
    BestForNavigation,
    Best,
    NearestTenMeters,
    HundredMeters,
    Kilometer,
    #[default]
    ThreeKilometers,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
/// Minimum distance the device must move before a new fix is reported
pub enum DistanceFilter {
    /// Report every fix
    #[default]
    None,
    /// Only report a fix after moving this many meters
    Meters(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Configuration handed to the provider once, before it is attached
pub struct ProviderConfig {
    pub desired_accuracy: Accuracy,
    pub distance_filter: DistanceFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Settings for a [crate::GeolocationService], fixed at construction
pub struct ServiceSettings {
    /// Mapping used by the is-authorized stream
    pub authorization_policy: AuthorizationPolicy,
    /// Check for "when in use" or "always" permission before a one-shot request, yielding no
    /// location instead of asking the provider when it's missing
    pub one_shot_requires_authorization: bool,
    /// Accuracy passed to the provider
    pub desired_accuracy: Accuracy,
    /// Distance filter passed to the provider
    pub distance_filter: DistanceFilter,
    /// How many notifications a slow subscriber may fall behind before it starts skipping
    pub channel_capacity: usize,
}

impl ServiceSettings {
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            desired_accuracy: self.desired_accuracy,
            distance_filter: self.distance_filter,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            authorization_policy: AuthorizationPolicy::default(),
            one_shot_requires_authorization: false,
            desired_accuracy: Accuracy::default(),
            distance_filter: DistanceFilter::default(),
            channel_capacity: 16,
        }
    }
}
