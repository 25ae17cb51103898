use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use geostream_logic::{
    AuthorizationStatus, Coordinate, LocationDelegate, LocationProvider, ProviderConfig,
};
use log::{debug, info};
use rand::{
    SeedableRng,
    distr::{Distribution, Uniform},
};
use rand_chacha::ChaCha8Rng;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::{config::SimulationSettings, prelude::*};

/// Random walk starting at a fixed point, deterministic for a given seed
struct RandomWalk {
    current: Coordinate,
    rng: ChaCha8Rng,
    step: Uniform<f64>,
}

impl RandomWalk {
    fn new(settings: &SimulationSettings) -> Result<Self> {
        let step = Uniform::new_inclusive(-settings.step_degrees, settings.step_degrees)
            .map_err(|err| anyhow!("Invalid step size {}: {err}", settings.step_degrees))?;
        Ok(Self {
            current: settings.start,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            step,
        })
    }

    fn step(&mut self) -> Coordinate {
        let lat = self.current.latitude + self.step.sample(&mut self.rng);
        let long = self.current.longitude + self.step.sample(&mut self.rng);
        self.current = Coordinate::new(lat.clamp(-90.0, 90.0), wrap_longitude(long));
        self.current
    }
}

fn wrap_longitude(long: f64) -> f64 {
    (long + 180.0).rem_euclid(360.0) - 180.0
}

struct Tasks {
    continuous: Option<CancellationToken>,
    requests: CancellationToken,
}

struct Shared {
    settings: SimulationSettings,
    status: Mutex<AuthorizationStatus>,
    delegate: OnceLock<LocationDelegate>,
    walk: Mutex<RandomWalk>,
}

impl Shared {
    fn status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_fix(&self) -> Coordinate {
        self.walk
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .step()
    }

    fn delegate(&self) -> Option<&LocationDelegate> {
        self.delegate.get()
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.interval_ms.max(1))
    }

    fn resolve_prompt(&self, always: bool) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);

        let new_status = match *status {
            AuthorizationStatus::NotDetermined if self.settings.deny => AuthorizationStatus::Denied,
            AuthorizationStatus::NotDetermined if always => AuthorizationStatus::AuthorizedAlways,
            AuthorizationStatus::NotDetermined => AuthorizationStatus::AuthorizedWhenInUse,
            AuthorizationStatus::AuthorizedWhenInUse if always => {
                AuthorizationStatus::AuthorizedAlways
            }
            current => {
                debug!("Permission prompt suppressed, status is already {current}");
                return;
            }
        };

        *status = new_status;
        drop(status);

        info!("Simulated user answered the permission prompt: {new_status}");
        if let Some(delegate) = self.delegate() {
            delegate.authorization_changed(new_status);
        }
    }
}

/// Location provider that fakes the platform: permission prompts resolve after a delay and fixes
/// follow a seeded random walk.
///
/// Must be created inside a tokio runtime, timers run on that runtime.
pub struct SimulatedProvider {
    shared: Arc<Shared>,
    tasks: Mutex<Tasks>,
    runtime: Handle,
}

impl SimulatedProvider {
    pub fn new(settings: SimulationSettings) -> Result<Self> {
        let runtime = Handle::try_current().context("Simulated provider needs a tokio runtime")?;
        let walk = RandomWalk::new(&settings)?;
        Ok(Self {
            shared: Arc::new(Shared {
                status: Mutex::new(settings.initial_status),
                settings,
                delegate: OnceLock::new(),
                walk: Mutex::new(walk),
            }),
            tasks: Mutex::new(Tasks {
                continuous: None,
                requests: CancellationToken::new(),
            }),
            runtime,
        })
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prompt(&self, always: bool) {
        let shared = self.shared.clone();
        let delay = Duration::from_millis(self.shared.settings.permission_delay_ms);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            shared.resolve_prompt(always);
        });
    }

    async fn continuous_loop(shared: Arc<Shared>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(shared.interval());
        // The first tick completes immediately, skip it so fixes are spaced out
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    break;
                }

                _ = interval.tick() => {
                    let status = shared.status();
                    if !status.grants_access() {
                        debug!("Skipping fix, authorization is {status}");
                        continue;
                    }
                    if let Some(delegate) = shared.delegate() {
                        delegate.locations_updated(vec![shared.next_fix()]);
                    }
                }
            }
        }

        debug!("Simulated continuous updates stopped");
    }
}

impl LocationProvider for SimulatedProvider {
    fn configure(&self, config: &ProviderConfig) {
        debug!(
            "Simulated provider configured with {:?} accuracy, {:?} distance filter",
            config.desired_accuracy, config.distance_filter
        );
    }

    fn attach(&self, delegate: LocationDelegate) {
        if self.shared.delegate.set(delegate).is_err() {
            debug!("Simulated provider already has a delegate, ignoring");
        }
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.shared.status()
    }

    fn request_when_in_use_authorization(&self) {
        self.prompt(false);
    }

    fn request_always_authorization(&self) {
        self.prompt(true);
    }

    fn request_location(&self) {
        let shared = self.shared.clone();
        let cancel = self.tasks().requests.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(shared.interval()) => {
                    let Some(delegate) = shared.delegate() else {
                        return;
                    };
                    let status = shared.status();
                    if status.grants_access() {
                        delegate.locations_updated(vec![shared.next_fix()]);
                    } else {
                        delegate.location_failed(format!("Location access is {status}"));
                    }
                }
            }
        });
    }

    fn start_updating_location(&self) {
        let mut tasks = self.tasks();
        if tasks.continuous.is_some() {
            debug!("Simulated continuous updates already running");
            return;
        }

        let cancel = CancellationToken::new();
        tasks.continuous = Some(cancel.clone());
        drop(tasks);

        debug!("Simulated continuous updates started");
        self.runtime
            .spawn(Self::continuous_loop(self.shared.clone(), cancel));
    }

    fn stop_updating_location(&self) {
        let mut tasks = self.tasks();
        if let Some(cancel) = tasks.continuous.take() {
            cancel.cancel();
        }
        // Outstanding one-shot requests are abandoned too
        tasks.requests.cancel();
        tasks.requests = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use geostream_logic::{GeolocationService, LocationError, ServiceSettings, UpdateMode};
    use tokio::{task::yield_now, test};

    fn mk_settings() -> SimulationSettings {
        SimulationSettings {
            interval_ms: 1000,
            permission_delay_ms: 100,
            ..Default::default()
        }
    }

    fn mk_service(settings: SimulationSettings) -> GeolocationService<SimulatedProvider> {
        tokio::time::pause();
        let provider = SimulatedProvider::new(settings).expect("Failed to make provider");
        GeolocationService::new(provider, ServiceSettings::default())
    }

    #[test]
    async fn test_walk_is_deterministic() {
        let settings = mk_settings();
        let mut a = RandomWalk::new(&settings).unwrap();
        let mut b = RandomWalk::new(&settings).unwrap();

        for _ in 0..20 {
            let (fix_a, fix_b) = (a.step(), b.step());
            assert_eq!(fix_a, fix_b);
            assert!((fix_a.latitude - settings.start.latitude).abs() < 1.0);
        }
    }

    #[test]
    async fn test_walk_rejects_bad_step() {
        let settings = SimulationSettings {
            step_degrees: f64::NAN,
            ..mk_settings()
        };
        assert!(RandomWalk::new(&settings).is_err());
    }

    #[test]
    async fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(181.0), -179.0);
        assert_eq!(wrap_longitude(-181.0), 179.0);
        assert_eq!(wrap_longitude(12.5), 12.5);
    }

    #[test]
    async fn test_permission_prompt() {
        let service = mk_service(mk_settings());

        let mut statuses = Box::pin(service.request_authorization(false));
        assert_eq!(statuses.next().await, Some(AuthorizationStatus::NotDetermined));
        assert_eq!(
            statuses.next().await,
            Some(AuthorizationStatus::AuthorizedWhenInUse)
        );

        // Upgrading to always is allowed once
        let mut statuses = Box::pin(service.request_authorization(true));
        assert_eq!(
            statuses.next().await,
            Some(AuthorizationStatus::AuthorizedWhenInUse)
        );
        assert_eq!(
            statuses.next().await,
            Some(AuthorizationStatus::AuthorizedAlways)
        );
    }

    #[test]
    async fn test_denied_prompt() {
        let settings = SimulationSettings {
            deny: true,
            ..mk_settings()
        };
        let service = mk_service(settings);

        let mut authorized = Box::pin(service.is_authorized_stream());
        assert_eq!(authorized.next().await, Some(false));

        let mut statuses = Box::pin(service.request_authorization(true));
        statuses.next().await;
        assert_eq!(statuses.next().await, Some(AuthorizationStatus::Denied));
        assert_eq!(authorized.next().await, Some(false));

        let mut once = Box::pin(service.current_location_once());
        assert_eq!(
            once.next().await,
            Some(Err(LocationError::Provider("Location access is denied".into())))
        );
    }

    #[test]
    async fn test_one_shot_fix() {
        let settings = SimulationSettings {
            initial_status: AuthorizationStatus::AuthorizedAlways,
            ..mk_settings()
        };
        let start = settings.start;
        let service = mk_service(settings);

        let mut once = Box::pin(service.current_location_once());
        let fix = once
            .next()
            .await
            .expect("Stream ended early")
            .expect("Provider failed")
            .expect("No fix");

        assert!((fix.latitude - start.latitude).abs() < 0.001);
        assert_eq!(once.next().await, None);
        assert_eq!(service.update_mode(), UpdateMode::NotUpdating);
    }

    #[test]
    async fn test_continuous_until_stopped() {
        let settings = SimulationSettings {
            initial_status: AuthorizationStatus::AuthorizedWhenInUse,
            ..mk_settings()
        };
        let service = mk_service(settings);

        let mut updates = Box::pin(service.continuous_location_stream());
        let mut last = None;
        for _ in 0..3 {
            let fix = updates.next().await.expect("Ended").expect("Failed");
            assert_ne!(Some(fix), last);
            last = Some(fix);
        }

        // Starting again doesn't spawn a second walker
        let mut second = Box::pin(service.continuous_location_stream());
        let a = updates.next().await.expect("Ended").expect("Failed");
        let b = second.next().await.expect("Ended").expect("Failed");
        assert_eq!(a, b);

        service.teardown();
        assert_eq!(service.update_mode(), UpdateMode::NotUpdating);

        tokio::time::sleep(Duration::from_secs(5)).await;
        yield_now().await;
        assert_eq!(
            futures::FutureExt::now_or_never(updates.next()),
            None,
            "Fixes kept arriving after teardown"
        );
    }
}
