use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::{Stream, StreamExt, stream};
use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    error::LocationError,
    location::{AuthorizationStatus, Coordinate},
    provider::{Channels, LocationDelegate, LocationEvent, LocationProvider, RequestKind},
    settings::ServiceSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Whether the provider is currently asked to produce fixes
pub enum UpdateMode {
    #[default]
    NotUpdating,
    Updating,
}

struct Inner<P: LocationProvider> {
    provider: RwLock<Option<Arc<P>>>,
    channels: Arc<Channels>,
    settings: ServiceSettings,
    mode: Mutex<UpdateMode>,
}

impl<P: LocationProvider> Inner<P> {
    fn provider(&self) -> Option<Arc<P>> {
        self.provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_mode(&self, new_mode: UpdateMode) {
        let mut mode = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        if *mode != new_mode {
            debug!("Location updates {:?} -> {:?}", *mode, new_mode);
            *mode = new_mode;
        }
    }

    fn start_updates(&self, provider: &P) {
        self.set_mode(UpdateMode::Updating);
        provider.start_updating_location();
    }

    fn stop_updates(&self) {
        if let Some(provider) = self.provider() {
            provider.stop_updating_location();
        }
        self.set_mode(UpdateMode::NotUpdating);
    }

    fn read_status(&self) -> AuthorizationStatus {
        match self.provider() {
            Some(provider) => {
                let status = provider.authorization_status();
                self.channels.record_status(status);
                status
            }
            None => self.channels.last_status(),
        }
    }

    async fn fetch_once(self: Arc<Self>) -> Result<Option<Coordinate>, LocationError> {
        let Some(provider) = self.provider() else {
            debug!(
                "Skipping one-shot location: {}",
                LocationError::PermissionUnavailable
            );
            return Ok(None);
        };

        if self.settings.one_shot_requires_authorization {
            let status = self.read_status();
            if !status.grants_access() {
                debug!("Skipping one-shot location, authorization is {status}");
                return Ok(None);
            }
        }

        let mut rx = self.channels.subscribe_locations();
        self.channels.begin_one_shot();
        let _release = StopOnDrop(self.clone());

        self.set_mode(UpdateMode::Updating);
        provider.request_location();
        drop(provider);

        while let Some(event) = recv_next(&mut rx).await {
            match event {
                LocationEvent::Updated(batch) => return Ok(batch.last().copied()),
                LocationEvent::Failed(RequestKind::OneShot, err) => return Err(err),
                LocationEvent::Failed(RequestKind::Continuous, _) => {}
            }
        }
        Ok(None)
    }
}

/// Stops the provider's updates once, whichever way a one-shot request ends
struct StopOnDrop<P: LocationProvider>(Arc<Inner<P>>);

impl<P: LocationProvider> Drop for StopOnDrop<P> {
    fn drop(&mut self) {
        self.0.channels.end_one_shot();
        self.0.stop_updates();
    }
}

/// Receive the next notification, skipping over anything a slow subscriber missed.
/// Returns [None] once every sender is gone.
async fn recv_next<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(value) => break Some(value),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Subscriber fell behind, skipped {skipped} notification(s)");
            }
            Err(RecvError::Closed) => break None,
        }
    }
}

enum AuthFeed<P: LocationProvider> {
    Deferred(Arc<Inner<P>>),
    Live(broadcast::Receiver<AuthorizationStatus>),
    Done,
}

/// Adapts a callback-based [LocationProvider] into streams of permission changes and fixes.
///
/// One service owns exactly one provider. Clones share it, so construct the service once and
/// hand clones to whatever needs location access.
pub struct GeolocationService<P: LocationProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: LocationProvider> Clone for GeolocationService<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: LocationProvider> GeolocationService<P> {
    /// Take ownership of `provider`, configure it, and attach a delegate to it
    pub fn new(provider: P, settings: ServiceSettings) -> Self {
        let initial = provider.authorization_status();
        let channels = Arc::new(Channels::new(settings.channel_capacity, initial));

        provider.configure(&settings.provider_config());
        provider.attach(LocationDelegate::new(channels.clone()));

        Self {
            inner: Arc::new(Inner {
                provider: RwLock::new(Some(Arc::new(provider))),
                channels,
                settings,
                mode: Mutex::new(UpdateMode::NotUpdating),
            }),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }

    pub fn update_mode(&self) -> UpdateMode {
        *self
            .inner
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronously read the current permission status. Once the provider is released this is
    /// the last status it reported.
    pub fn current_authorization(&self) -> AuthorizationStatus {
        self.inner.read_status()
    }

    /// Stream of permission statuses.
    ///
    /// Nothing happens until the first poll. At that point the status is read from the provider
    /// and yielded, then every later change is forwarded. The stream never ends while the
    /// provider is attached. If the provider was already released the last known status is
    /// yielded and the stream ends.
    pub fn authorization_status_stream(
        &self,
    ) -> impl Stream<Item = AuthorizationStatus> + Send + 'static {
        stream::unfold(
            AuthFeed::Deferred(self.inner.clone()),
            |feed| async move {
                match feed {
                    AuthFeed::Deferred(inner) => {
                        // Subscribe before reading so no change slips in between
                        let rx = inner.channels.subscribe_auth();
                        let next = if inner.provider().is_some() {
                            AuthFeed::Live(rx)
                        } else {
                            AuthFeed::Done
                        };
                        Some((inner.read_status(), next))
                    }
                    AuthFeed::Live(mut rx) => recv_next(&mut rx)
                        .await
                        .map(|status| (status, AuthFeed::Live(rx))),
                    AuthFeed::Done => None,
                }
            },
        )
    }

    /// Whether the app is authorized, according to the configured
    /// [crate::AuthorizationPolicy]. By default only "always" counts.
    pub fn is_authorized_stream(&self) -> impl Stream<Item = bool> + Send + 'static {
        let policy = self.inner.settings.authorization_policy;
        self.authorization_status_stream()
            .map(move |status| policy.is_authorized(status))
    }

    /// Show the platform permission prompt, for "always" access if `always` is set, "when in use"
    /// otherwise. Returns [Self::authorization_status_stream] to observe the outcome.
    pub fn request_authorization(
        &self,
        always: bool,
    ) -> impl Stream<Item = AuthorizationStatus> + Send + 'static {
        match self.inner.provider() {
            Some(provider) if always => provider.request_always_authorization(),
            Some(provider) => provider.request_when_in_use_authorization(),
            None => warn!(
                "Can't request authorization: {}",
                LocationError::PermissionUnavailable
            ),
        }
        self.authorization_status_stream()
    }

    /// Yields exactly one item then ends.
    ///
    /// On first poll a single fix is requested. The item is the most recent coordinate from the
    /// next batch the provider reports, or the provider's error. If the provider has been
    /// released the item is `Ok(None)` and nothing is requested. Once requested, the provider's
    /// updates are stopped exactly once, when the item is produced or when the stream is dropped
    /// early. There is no timeout.
    pub fn current_location_once(
        &self,
    ) -> impl Stream<Item = Result<Option<Coordinate>, LocationError>> + Send + 'static {
        stream::once(self.inner.clone().fetch_once())
    }

    /// Start continuous updates immediately and stream the most recent coordinate of every
    /// non-empty batch.
    ///
    /// Updates begin when this is called, not when the stream is first polled. A provider failure
    /// is yielded once and ends the stream, unless a one-shot request was outstanding when it
    /// happened, in which case only the one-shot sees it. Dropping the stream does not stop the
    /// provider, but a one-shot request finishing or being dropped does, since both share the
    /// provider's update mode. Continuous subscribers then go quiet until updates are started
    /// again.
    pub fn continuous_location_stream(
        &self,
    ) -> impl Stream<Item = Result<Coordinate, LocationError>> + Send + 'static {
        let rx = self.inner.channels.subscribe_locations();

        match self.inner.provider() {
            Some(provider) => self.inner.start_updates(&provider),
            None => warn!(
                "Can't start continuous updates: {}",
                LocationError::PermissionUnavailable
            ),
        }

        stream::unfold(Some(rx), |state| async move {
            let Some(mut rx) = state else {
                return None;
            };
            while let Some(event) = recv_next(&mut rx).await {
                match event {
                    LocationEvent::Updated(batch) => {
                        if let Some(latest) = batch.last().copied() {
                            return Some((Ok(latest), Some(rx)));
                        }
                    }
                    LocationEvent::Failed(RequestKind::Continuous, err) => {
                        return Some((Err(err), None));
                    }
                    LocationEvent::Failed(RequestKind::OneShot, _) => {}
                }
            }
            None
        })
    }

    /// Release the provider handle, stopping updates first if they're running.
    /// Calling this again does nothing.
    pub fn teardown(&self) {
        if self.update_mode() == UpdateMode::Updating {
            self.inner.stop_updates();
        }

        let released = self
            .inner
            .provider
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if released.is_some() {
            info!("Released location provider");
        }
    }
}
