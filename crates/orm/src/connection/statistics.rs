//! Connection Statistics
//!
//! Per-connection counters of executed statements and driver failures.

use std::time::{Duration, Instant};

/// Snapshot of one named connection's counters
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub name: String,
    pub statements: u64,
    pub failures: u64,
    pub opened_at: Instant,
}

impl ConnectionStats {
    /// Failed statements as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.statements > 0 {
            (self.failures as f64 / self.statements as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn success_rate(&self) -> f64 {
        100.0 - self.error_rate()
    }

    /// Time since the physical connection was opened
    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn has_concerning_error_rate(&self, threshold: f64) -> bool {
        self.error_rate() > threshold
    }
}

/// Totals across all open connections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedStats {
    pub connection_count: usize,
    pub statements: u64,
    pub failures: u64,
}

impl AggregatedStats {
    pub fn from_connections(stats: &[ConnectionStats]) -> Self {
        Self {
            connection_count: stats.len(),
            statements: stats.iter().map(|s| s.statements).sum(),
            failures: stats.iter().map(|s| s.failures).sum(),
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.statements > 0 {
            (self.failures as f64 / self.statements as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str, statements: u64, failures: u64) -> ConnectionStats {
        ConnectionStats {
            name: name.to_string(),
            statements,
            failures,
            opened_at: Instant::now(),
        }
    }

    #[test]
    fn test_error_rate() {
        let idle = stats("default", 0, 0);
        assert_eq!(idle.error_rate(), 0.0);

        let busy = stats("default", 200, 10);
        assert_eq!(busy.error_rate(), 5.0);
        assert_eq!(busy.success_rate(), 95.0);
        assert!(busy.has_concerning_error_rate(1.0));
        assert!(!busy.has_concerning_error_rate(10.0));
    }

    #[test]
    fn test_aggregation() {
        let total = AggregatedStats::from_connections(&[stats("default", 90, 1), stats("reporting", 10, 1)]);
        assert_eq!(total.connection_count, 2);
        assert_eq!(total.statements, 100);
        assert_eq!(total.error_rate(), 2.0);
    }
}
