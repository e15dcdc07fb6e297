use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Accounting for one finished invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InvocationReport {
    pub thread_id: String,
    pub duration: Duration,
    pub rounds: usize,
    pub tool_calls: usize,
    pub tool_failures: usize,
    pub success: bool,
}

impl InvocationReport {
    pub fn success_rate(reports: &[Self]) -> f32 {
        if reports.is_empty() {
            return 0.0;
        }
        let successes = reports.iter().filter(|r| r.success).count();
        successes as f32 / reports.len() as f32
    }
}

#[derive(Default, Clone)]
pub struct MetricsTracker {
    reports: Arc<Mutex<Vec<InvocationReport>>>,
}

impl MetricsTracker {
    pub fn start_run(&self, thread_id: &str) -> RunGuard {
        RunGuard {
            start: Instant::now(),
            thread_id: thread_id.to_string(),
            rounds: 0,
            tool_calls: 0,
            tool_failures: 0,
            metrics: self.clone(),
        }
    }

    pub fn reports(&self) -> Vec<InvocationReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

pub struct RunGuard {
    start: Instant,
    thread_id: String,
    rounds: usize,
    tool_calls: usize,
    tool_failures: usize,
    metrics: MetricsTracker,
}

impl RunGuard {
    pub fn record_round(&mut self) {
        self.rounds += 1;
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    pub fn record_tool_failure(&mut self) {
        self.tool_failures += 1;
    }

    pub fn finish(self, success: bool) -> InvocationReport {
        let report = InvocationReport {
            thread_id: self.thread_id,
            duration: self.start.elapsed(),
            rounds: self.rounds,
            tool_calls: self.tool_calls,
            tool_failures: self.tool_failures,
            success,
        };
        if let Ok(mut reports) = self.metrics.reports.lock() {
            reports.push(report.clone());
        }
        report
    }
}
