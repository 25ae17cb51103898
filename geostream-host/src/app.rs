use std::{io::Write, pin::pin};

use futures::StreamExt;
use geostream_logic::{AuthorizationStatus, GeolocationService, LocationProvider};
use log::{info, warn};

use crate::prelude::*;

#[derive(Debug, Clone, Default)]
/// What the host should do once it has permission
pub struct RunOptions {
    /// Ask for "always" access instead of "when in use"
    pub always: bool,
    /// Print a single fix instead of following updates
    pub once: bool,
    /// Stop following updates after this many fixes
    pub count: Option<usize>,
}

async fn wait_for_decision<P: LocationProvider>(
    service: &GeolocationService<P>,
    always: bool,
) -> Result<AuthorizationStatus> {
    let mut statuses = pin!(service.request_authorization(always));

    while let Some(status) = statuses.next().await {
        info!("Location authorization: {status}");
        if status.is_refused() {
            bail!("Location access is {status}");
        } else if status.grants_access() {
            return Ok(status);
        }
    }

    bail!("Authorization updates ended before the prompt was answered")
}

/// Request permission, then print fixes to `out` one per line.
/// Returns how many fixes were printed.
pub async fn run<P: LocationProvider>(
    service: &GeolocationService<P>,
    opts: &RunOptions,
    out: &mut impl Write,
) -> Result<usize> {
    let status = wait_for_decision(service, opts.always)
        .await
        .context("Failed to get location permission")?;

    let authorized = pin!(service.is_authorized_stream())
        .next()
        .await
        .unwrap_or(false);

    if !authorized {
        warn!(
            "Location access is {status}, which the {:?} policy doesn't count as authorized",
            service.settings().authorization_policy
        );
    }

    if opts.once {
        let mut once = pin!(service.current_location_once());
        return match once.next().await {
            Some(Ok(Some(coord))) => {
                writeln!(out, "{coord}")?;
                Ok(1)
            }
            Some(Ok(None)) | None => {
                warn!("No location available");
                Ok(0)
            }
            Some(Err(err)) => Err(err).context("Failed to get current location"),
        };
    }

    let mut updates = pin!(service.continuous_location_stream());
    let mut printed = 0;

    while opts.count.is_none_or(|max| printed < max) {
        let Some(fix) = updates.next().await else {
            break;
        };
        let coord = fix.context("Location updates failed")?;
        writeln!(out, "{coord}")?;
        printed += 1;
    }

    Ok(printed)
}

#[cfg(test)]
mod tests {
    use geostream_logic::{AuthorizationPolicy, ServiceSettings, UpdateMode};
    use tokio::test;

    use super::*;
    use crate::{SimulatedProvider, SimulationSettings};

    fn mk_service(
        simulation: SimulationSettings,
        service: ServiceSettings,
    ) -> GeolocationService<SimulatedProvider> {
        tokio::time::pause();
        let provider = SimulatedProvider::new(simulation).expect("Failed to make provider");
        GeolocationService::new(provider, service)
    }

    fn lines(out: Vec<u8>) -> Vec<String> {
        String::from_utf8(out)
            .expect("Output wasn't UTF-8")
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    async fn test_follow_updates() {
        let service = mk_service(SimulationSettings::default(), ServiceSettings::default());
        let opts = RunOptions {
            always: true,
            once: false,
            count: Some(3),
        };

        let mut out = Vec::new();
        let printed = run(&service, &opts, &mut out).await.expect("Run failed");

        assert_eq!(printed, 3);
        let lines = lines(out);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.contains(", ")), "Bad output {lines:?}");
        assert_eq!(service.update_mode(), UpdateMode::Updating);

        service.teardown();
        assert_eq!(service.update_mode(), UpdateMode::NotUpdating);
    }

    #[test]
    async fn test_once() {
        let service = mk_service(SimulationSettings::default(), ServiceSettings::default());
        let opts = RunOptions {
            once: true,
            ..Default::default()
        };

        let mut out = Vec::new();
        let printed = run(&service, &opts, &mut out).await.expect("Run failed");

        assert_eq!(printed, 1);
        assert_eq!(lines(out).len(), 1);
        assert_eq!(
            service.current_authorization(),
            AuthorizationStatus::AuthorizedWhenInUse
        );
        assert_eq!(service.update_mode(), UpdateMode::NotUpdating);
    }

    #[test]
    async fn test_when_in_use_still_runs_under_narrow_policy() {
        let service = mk_service(
            SimulationSettings::default(),
            ServiceSettings {
                authorization_policy: AuthorizationPolicy::AlwaysOnly,
                ..Default::default()
            },
        );
        let opts = RunOptions {
            count: Some(1),
            ..Default::default()
        };

        let mut out = Vec::new();
        let printed = run(&service, &opts, &mut out).await.expect("Run failed");
        assert_eq!(printed, 1);
    }

    #[test]
    async fn test_denied() {
        let simulation = SimulationSettings {
            deny: true,
            ..Default::default()
        };
        let service = mk_service(simulation, ServiceSettings::default());

        let mut out = Vec::new();
        let err = run(&service, &RunOptions::default(), &mut out)
            .await
            .expect_err("Run should fail when denied");

        assert!(
            format!("{err:#}").contains("Location access is denied"),
            "Unexpected error: {err:#}"
        );
        assert!(out.is_empty());
    }

    #[test]
    async fn test_torn_down_service() {
        let simulation = SimulationSettings {
            initial_status: AuthorizationStatus::AuthorizedAlways,
            ..Default::default()
        };
        let service = mk_service(simulation, ServiceSettings::default());
        service.teardown();

        let opts = RunOptions {
            once: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        let printed = run(&service, &opts, &mut out).await.expect("Run failed");
        assert_eq!(printed, 0);
    }
}
