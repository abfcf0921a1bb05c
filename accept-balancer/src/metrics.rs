//! accept-balancer metrics.
//!
//! Process-wide counters for the accept thread. Exposed via Prometheus
//! when the embedding process serves the metriken registry.

use metriken::{Counter, Gauge, metric};

// ── Accept path ──────────────────────────────────────────────────

#[metric(
    name = "accept_balancer/poll/wakeups",
    description = "Times the accept thread returned from its primary poll"
)]
pub static POLL_WAKEUPS: Counter = Counter::new();

#[metric(
    name = "accept_balancer/connections/accepted",
    description = "Total connections accepted from listening endpoints"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "accept_balancer/accept/errors",
    description = "Accept failures other than EAGAIN, each followed by a cooldown"
)]
pub static ACCEPT_ERRORS: Counter = Counter::new();

#[metric(
    name = "accept_balancer/accept/accept4_fallbacks",
    description = "Times accept4 was found unsupported and disabled"
)]
pub static ACCEPT4_FALLBACKS: Counter = Counter::new();

// ── Dispatch ─────────────────────────────────────────────────────

#[metric(
    name = "accept_balancer/connections/dispatched",
    description = "Connections handed to a worker"
)]
pub static CONNECTIONS_DISPATCHED: Counter = Counter::new();

#[metric(
    name = "accept_balancer/connections/dropped",
    description = "Accepted connections closed without reaching a worker"
)]
pub static CONNECTIONS_DROPPED: Counter = Counter::new();

#[metric(
    name = "accept_balancer/workers/live",
    description = "Workers still accepting connections"
)]
pub static WORKERS_LIVE: Gauge = Gauge::new();
