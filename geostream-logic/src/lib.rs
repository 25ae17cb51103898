mod error;
mod location;
mod provider;
mod service;
mod settings;

pub use error::LocationError;
pub use location::{AuthorizationStatus, Coordinate, LocationComponent};
pub use provider::{LocationDelegate, LocationEvent, LocationProvider, RequestKind};
pub use service::{GeolocationService, UpdateMode};
pub use settings::{Accuracy, AuthorizationPolicy, DistanceFilter, ProviderConfig, ServiceSettings};
