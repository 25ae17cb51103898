use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use log::{debug, trace};
use tokio::sync::broadcast;

use crate::{
    error::LocationError,
    location::{AuthorizationStatus, Coordinate},
    settings::ProviderConfig,
};

/// Which kind of request a provider failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A single fix requested with [LocationProvider::request_location]
    OneShot,
    /// Continuous updates started with [LocationProvider::start_updating_location]
    Continuous,
}

/// A notification pushed by the provider about location fetching
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    /// A batch of fixes, oldest first. The platform may deliver empty batches.
    Updated(Arc<[Coordinate]>),
    /// The provider failed to get a location, only streams of the given kind see this
    Failed(RequestKind, LocationError),
}

/// Handle to the platform's location and permission APIs.
///
/// Commands go out through the methods on this trait, notifications come back in through the
/// [LocationDelegate] handed to [LocationProvider::attach].
pub trait LocationProvider: Send + Sync + 'static {
    /// Apply accuracy and filtering configuration, called once before [LocationProvider::attach]
    fn configure(&self, _config: &ProviderConfig) {}
    /// Store the delegate that platform callbacks should be forwarded to
    fn attach(&self, delegate: LocationDelegate);
    /// Synchronously read the current permission status
    fn authorization_status(&self) -> AuthorizationStatus;
    /// Show the platform prompt for "when in use" access
    fn request_when_in_use_authorization(&self);
    /// Show the platform prompt for "always" access
    fn request_always_authorization(&self);
    /// Ask for a single fix, delivered as a normal location update
    fn request_location(&self);
    /// Begin continuous updates
    fn start_updating_location(&self);
    /// End continuous updates (and any outstanding single request)
    fn stop_updating_location(&self);
}

pub(crate) struct Channels {
    auth: broadcast::Sender<AuthorizationStatus>,
    locations: broadcast::Sender<LocationEvent>,
    last_status: Mutex<AuthorizationStatus>,
    pending_one_shots: AtomicUsize,
}

impl Channels {
    pub fn new(capacity: usize, initial: AuthorizationStatus) -> Self {
        // Broadcast channels panic on a capacity of zero
        let capacity = capacity.max(1);
        let (auth, _) = broadcast::channel(capacity);
        let (locations, _) = broadcast::channel(capacity);
        Self {
            auth,
            locations,
            last_status: Mutex::new(initial),
            pending_one_shots: AtomicUsize::new(0),
        }
    }

    pub fn subscribe_auth(&self) -> broadcast::Receiver<AuthorizationStatus> {
        self.auth.subscribe()
    }

    pub fn subscribe_locations(&self) -> broadcast::Receiver<LocationEvent> {
        self.locations.subscribe()
    }

    pub fn last_status(&self) -> AuthorizationStatus {
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_status(&self, status: AuthorizationStatus) {
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn begin_one_shot(&self) {
        self.pending_one_shots.fetch_add(1, Ordering::SeqCst);
    }

    pub fn end_one_shot(&self) {
        self.pending_one_shots.fetch_sub(1, Ordering::SeqCst);
    }

    /// The platform doesn't say which request failed. While a single fix is outstanding it's
    /// blamed for the failure, otherwise continuous updates are.
    fn failure_kind(&self) -> RequestKind {
        if self.pending_one_shots.load(Ordering::SeqCst) > 0 {
            RequestKind::OneShot
        } else {
            RequestKind::Continuous
        }
    }
}

/// Receives callbacks from the platform and fans them out to every subscribed stream.
///
/// Cheap to clone, may be called from any thread.
#[derive(Clone)]
pub struct LocationDelegate(Arc<Channels>);

impl LocationDelegate {
    pub(crate) fn new(channels: Arc<Channels>) -> Self {
        Self(channels)
    }

    /// The platform reports a change in permission status
    pub fn authorization_changed(&self, status: AuthorizationStatus) {
        debug!("Authorization changed to {status}");
        self.0.record_status(status);
        // No subscribers isn't an error, the change is still recorded above
        self.0.auth.send(status).ok();
    }

    /// The platform reports a batch of fixes
    pub fn locations_updated(&self, batch: impl Into<Arc<[Coordinate]>>) {
        let batch = batch.into();
        trace!("Received batch of {} location(s)", batch.len());
        self.0.locations.send(LocationEvent::Updated(batch)).ok();
    }

    /// The platform failed to fetch a location
    pub fn location_failed(&self, message: impl Into<String>) {
        let err = LocationError::Provider(message.into());
        let kind = self.0.failure_kind();
        debug!("{err} ({kind:?} request)");
        self.0.locations.send(LocationEvent::Failed(kind, err)).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::test;

    #[test]
    async fn test_delegate_fans_out() {
        let channels = Arc::new(Channels::new(4, AuthorizationStatus::NotDetermined));
        let delegate = LocationDelegate::new(channels.clone());

        let mut rx1 = channels.subscribe_locations();
        let mut rx2 = channels.subscribe_locations();

        delegate.locations_updated(vec![Coordinate::new(1.0, 2.0)]);

        let expected = LocationEvent::Updated(vec![Coordinate::new(1.0, 2.0)].into());
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    #[test]
    async fn test_status_recorded_without_subscribers() {
        let channels = Arc::new(Channels::new(4, AuthorizationStatus::NotDetermined));
        let delegate = LocationDelegate::new(channels.clone());

        delegate.authorization_changed(AuthorizationStatus::Denied);

        assert_eq!(channels.last_status(), AuthorizationStatus::Denied);
    }

    #[test]
    async fn test_failure_is_wrapped() {
        let channels = Arc::new(Channels::new(4, AuthorizationStatus::NotDetermined));
        let delegate = LocationDelegate::new(channels.clone());
        let mut rx = channels.subscribe_locations();

        delegate.location_failed("kCLErrorLocationUnknown");

        assert_eq!(
            rx.recv().await.unwrap(),
            LocationEvent::Failed(
                RequestKind::Continuous,
                LocationError::Provider("kCLErrorLocationUnknown".into())
            )
        );
    }

    #[test]
    async fn test_failure_blames_pending_one_shot() {
        let channels = Arc::new(Channels::new(4, AuthorizationStatus::NotDetermined));
        let delegate = LocationDelegate::new(channels.clone());
        let mut rx = channels.subscribe_locations();

        channels.begin_one_shot();
        delegate.location_failed("first");
        channels.end_one_shot();
        delegate.location_failed("second");

        assert_eq!(
            rx.recv().await.unwrap(),
            LocationEvent::Failed(RequestKind::OneShot, LocationError::Provider("first".into()))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            LocationEvent::Failed(
                RequestKind::Continuous,
                LocationError::Provider("second".into())
            )
        );
    }

    #[test]
    async fn test_zero_capacity_clamped() {
        let channels = Channels::new(0, AuthorizationStatus::NotDetermined);
        let mut rx = channels.subscribe_auth();
        channels.auth.send(AuthorizationStatus::Denied).unwrap();
        assert_eq!(rx.recv().await.unwrap(), AuthorizationStatus::Denied);
    }
}
