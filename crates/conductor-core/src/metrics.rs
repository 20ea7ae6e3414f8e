//! Per-agent counters and latency samples, and alert evaluation against the
//! monitoring thresholds.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;

use conductor_contracts::{agent::AgentId, policy::AlertThresholds};

const LATENCY_SAMPLES: usize = 1024;

#[derive(Debug, Default)]
struct AgentStats {
    processed: u64,
    failed: u64,
    latencies: VecDeque<Duration>,
    startup: Option<Duration>,
}

impl AgentStats {
    fn push_latency(&mut self, elapsed: Duration) {
        self.latencies.push_back(elapsed);
        if self.latencies.len() > LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
    }
}

/// A point-in-time view of one agent's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub processed: u64,
    pub failed: u64,
    pub p95_ms: Option<u64>,
    pub startup_ms: Option<u64>,
}

impl AgentMetrics {
    /// Failed over total dispatches; `0.0` before any dispatch.
    pub fn error_rate(&self) -> f64 {
        let total = self.processed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

/// A threshold crossed at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Alert {
    ErrorRate { agent_id: String, rate: f64, threshold: f64 },
    LatencyP95 { agent_id: String, p95_ms: u64, threshold_ms: u64 },
    QueueDepth { agent_id: String, depth: usize, threshold: usize },
    MemoryUsage { usage: f64, threshold: f64 },
}

#[derive(Default)]
pub struct Metrics {
    agents: Mutex<HashMap<AgentId, AgentStats>>,
    sla_breaches: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_agent(&self, agent_id: &AgentId, f: impl FnOnce(&mut AgentStats)) {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        f(agents.entry(agent_id.clone()).or_default());
    }

    pub fn record_startup(&self, agent_id: &AgentId, elapsed: Duration) {
        self.with_agent(agent_id, |stats| stats.startup = Some(elapsed));
    }

    pub fn record_success(&self, agent_id: &AgentId, elapsed: Duration) {
        self.with_agent(agent_id, |stats| {
            stats.processed += 1;
            stats.push_latency(elapsed);
        });
    }

    pub fn record_failure(&self, agent_id: &AgentId, elapsed: Duration) {
        self.with_agent(agent_id, |stats| {
            stats.failed += 1;
            stats.push_latency(elapsed);
        });
    }

    /// Count one SLA breach under `scope` (an agent type or workflow id).
    pub fn record_sla_breach(&self, scope: &str) {
        *self
            .sla_breaches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(scope.to_string())
            .or_insert(0) += 1;
    }

    pub fn sla_breaches(&self, scope: &str) -> u64 {
        self.sla_breaches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .copied()
            .unwrap_or(0)
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<AgentMetrics> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .map(summarize)
    }

    pub fn snapshot(&self) -> BTreeMap<String, AgentMetrics> {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, stats)| (id.0.clone(), summarize(stats)))
            .collect()
    }

    /// Compare current metrics with `thresholds`.
    ///
    /// `queue_depths` maps agent ids to mailbox lengths. `memory_usage` is a
    /// fraction supplied by the host, if it measures one.
    pub fn evaluate_alerts(
        &self,
        thresholds: &AlertThresholds,
        queue_depths: &BTreeMap<String, usize>,
        memory_usage: Option<f64>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for (agent_id, metrics) in self.snapshot() {
            let rate = metrics.error_rate();
            if rate > thresholds.error_rate {
                alerts.push(Alert::ErrorRate {
                    agent_id: agent_id.clone(),
                    rate,
                    threshold: thresholds.error_rate,
                });
            }
            if let Some(p95_ms) = metrics.p95_ms {
                if p95_ms > thresholds.latency_p95_ms {
                    alerts.push(Alert::LatencyP95 {
                        agent_id,
                        p95_ms,
                        threshold_ms: thresholds.latency_p95_ms,
                    });
                }
            }
        }

        for (agent_id, depth) in queue_depths {
            if *depth > thresholds.queue_depth {
                alerts.push(Alert::QueueDepth {
                    agent_id: agent_id.clone(),
                    depth: *depth,
                    threshold: thresholds.queue_depth,
                });
            }
        }

        if let Some(usage) = memory_usage {
            if usage > thresholds.memory_usage {
                alerts.push(Alert::MemoryUsage {
                    usage,
                    threshold: thresholds.memory_usage,
                });
            }
        }

        alerts
    }
}

fn summarize(stats: &AgentStats) -> AgentMetrics {
    AgentMetrics {
        processed: stats.processed,
        failed: stats.failed,
        p95_ms: p95(&stats.latencies).map(|d| d.as_millis() as u64),
        startup_ms: stats.startup.map(|d| d.as_millis() as u64),
    }
}

/// Nearest-rank 95th percentile.
fn p95(samples: &VecDeque<Duration>) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    sorted.get(rank.saturating_sub(1)).copied()
}
