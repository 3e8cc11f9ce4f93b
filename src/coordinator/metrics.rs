//! Prometheus text exposition for the probe server's `/metrics` endpoint.
//!
//! Hand-formatted rather than built on the `prometheus` crate: the metric
//! set is small and fixed (per SPEC_FULL.md's note on `rest_api.rs` already
//! hand-rolling its response DTOs), so a crate dependency buys nothing
//! `format!` doesn't.

use std::fmt::Write as _;

use super::probe::AgentCounts;

/// Renders the four `activematrix_*` metrics as Prometheus exposition text.
///
/// The metric name prefix is part of the external wire contract (§6) and is
/// kept verbatim even though the project itself is named Conclave. Per-state
/// gauges use the six mutually-exclusive lifecycle states so they sum to
/// `activematrix_agents_total`.
pub fn render(up: bool, uptime_seconds: u64, workers: usize, counts: &AgentCounts) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# HELP activematrix_up Whether the daemon is accepting traffic");
    let _ = writeln!(out, "# TYPE activematrix_up gauge");
    let _ = writeln!(out, "activematrix_up {}", u8::from(up));

    let _ = writeln!(out, "# HELP activematrix_uptime_seconds Seconds since the coordinator started");
    let _ = writeln!(out, "# TYPE activematrix_uptime_seconds counter");
    let _ = writeln!(out, "activematrix_uptime_seconds {uptime_seconds}");

    let _ = writeln!(out, "# HELP activematrix_workers Number of worker processes");
    let _ = writeln!(out, "# TYPE activematrix_workers gauge");
    let _ = writeln!(out, "activematrix_workers {workers}");

    let _ = writeln!(out, "# HELP activematrix_agents_total Total number of persisted agents");
    let _ = writeln!(out, "# TYPE activematrix_agents_total gauge");
    let _ = writeln!(out, "activematrix_agents_total {}", counts.total());

    let _ = writeln!(out, "# HELP activematrix_agents Number of agents by lifecycle state");
    let _ = writeln!(out, "# TYPE activematrix_agents gauge");
    for (state, count) in [
        ("offline", counts.offline),
        ("connecting", counts.connecting),
        ("online_idle", counts.online_idle),
        ("online_busy", counts.online_busy),
        ("paused", counts.paused),
        ("error", counts.error),
    ] {
        let _ = writeln!(out, "activematrix_agents{{state=\"{state}\"}} {count}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_named_metric() {
        let counts = AgentCounts { offline: 1, connecting: 0, online_idle: 2, online_busy: 1, paused: 0, error: 0 };
        let text = render(true, 42, 2, &counts);
        assert!(text.contains("activematrix_up 1"));
        assert!(text.contains("activematrix_uptime_seconds 42"));
        assert!(text.contains("activematrix_workers 2"));
        assert!(text.contains("activematrix_agents_total 4"));
        assert!(text.contains("activematrix_agents{state=\"online_idle\"} 2"));
        assert!(text.contains("activematrix_agents{state=\"offline\"} 1"));
    }
}
