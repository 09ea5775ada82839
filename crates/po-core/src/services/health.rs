//! Health and resource-usage derivation for deployment status queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpStream;

use crate::models::{ContainerInspect, ContainerStats, Health, StatsSample};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether something accepts TCP connections on `127.0.0.1:port`.
pub async fn probe_tcp(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Combine the engine's view of a container with an optional liveness
/// probe result. `None` for `inspect` means the engine no longer knows the
/// container.
pub fn derive_health(inspect: Option<&ContainerInspect>, probe: Option<bool>) -> Health {
    let Some(inspect) = inspect else {
        return Health::Missing;
    };
    if !inspect.running {
        return Health::Stopped;
    }
    match inspect.health.as_deref() {
        Some("unhealthy") => return Health::Unhealthy,
        Some("starting") => return Health::Starting,
        _ => {}
    }
    match probe {
        Some(false) => Health::Unhealthy,
        _ => Health::Healthy,
    }
}

/// Seconds since `started_at`, if known.
pub fn uptime_secs(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    started_at.map(|started| (now - started).num_seconds().max(0))
}

pub fn assemble_stats(
    sample: Option<StatsSample>,
    inspect: Option<&ContainerInspect>,
    now: DateTime<Utc>,
) -> ContainerStats {
    let sample = sample.unwrap_or_default();
    let uptime = inspect
        .filter(|i| i.running)
        .and_then(|i| uptime_secs(i.started_at, now));
    ContainerStats {
        cpu_percent: sample.cpu_percent,
        memory_percent: sample.memory_percent,
        uptime_secs: uptime,
    }
}
