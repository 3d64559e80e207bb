//! Lightweight stats emitted as debug logs
//!
//! Every stat is written as `namespace.stat || value` under the
//! `telekinesis::stats` target, so they can be scraped from logs or silenced
//! with an `EnvFilter` directive.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct StatLogger {
    namespace: Option<String>,
}

impl StatLogger {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    pub fn increment(&self, stat: &str) {
        self.emit(stat, 1);
    }

    pub fn decrement(&self, stat: &str) {
        self.emit(stat, -1);
    }

    pub fn count(&self, stat: &str, count: i64) {
        self.emit(stat, count);
    }

    pub fn gauge(&self, stat: &str, value: impl Display) {
        self.emit(stat, value);
    }

    pub fn timing(&self, stat: &str, ms: u128) {
        self.emit(stat, format_args!("{}ms", ms));
    }

    /// Awaits `fut` and records how long it took
    pub async fn time<F, T>(&self, stat: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.timing(stat, start.elapsed().as_millis());
        result
    }

    pub fn format(&self, stat: &str, value: impl Display) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{} || {}", ns, stat, value),
            None => format!("{} || {}", stat, value),
        }
    }

    fn emit(&self, stat: &str, value: impl Display) {
        if tracing::enabled!(target: "telekinesis::stats", tracing::Level::DEBUG) {
            debug!(target: "telekinesis::stats", "{}", self.format(stat, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_with_namespace() {
        let stats = StatLogger::new(Some("unit_test".to_string()));
        assert_eq!(stats.format("inc", 1), "unit_test.inc || 1");
        assert_eq!(stats.format("dec", -1), "unit_test.dec || -1");
        assert_eq!(
            stats.format("timing", format_args!("{}ms", 1001)),
            "unit_test.timing || 1001ms"
        );
    }

    #[test]
    fn test_format_without_namespace() {
        assert_eq!(StatLogger::default().format("gauge", 123), "gauge || 123");
    }

    #[test]
    fn test_time_returns_result() {
        let stats = StatLogger::default();
        let value = tokio_test::block_on(stats.time("op", async { 42 }));
        assert_eq!(value, 42);
    }
}
