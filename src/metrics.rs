//! Prometheus instrumentation for the data source proxy.
//!
//! # Metrics
//!
//! - `tenantgate_dataproxy_request_duration_seconds{outcome}`: histogram of
//!   proxy request handling time, labelled by how the request ended
//! - `tenantgate_isolation_short_circuits_total`: requests answered by the
//!   isolation policy without contacting a data source

use std::sync::Arc;
use std::time::Instant;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

/// How a proxied request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Answered by the isolation policy
    ShortCircuit,
    /// Handed to the reverse-proxy executor
    Forwarded,
    /// Terminated with an error before reaching the executor
    Error,
}

impl Outcome {
    /// Label value for this outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::ShortCircuit => "short_circuit",
            Outcome::Forwarded => "forwarded",
            Outcome::Error => "error",
        }
    }
}

/// Gateway metrics and the registry that owns them.
pub struct GatewayMetrics {
    registry: Registry,
    request_duration: HistogramVec,
    short_circuits: IntCounter,
}

impl GatewayMetrics {
    /// Create and register every gateway metric in a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns error if a metric definition is rejected by the registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "tenantgate_dataproxy_request_duration_seconds",
                "Time spent handling data source proxy requests",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["outcome"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let short_circuits = IntCounter::with_opts(Opts::new(
            "tenantgate_isolation_short_circuits_total",
            "Requests answered by the tenant isolation policy",
        ))?;
        registry.register(Box::new(short_circuits.clone()))?;

        Ok(Self {
            registry,
            request_duration,
            short_circuits,
        })
    }

    /// Count one isolation short-circuit.
    pub fn record_short_circuit(&self) {
        self.short_circuits.inc();
    }

    /// Number of short-circuits recorded so far.
    pub fn short_circuit_count(&self) -> u64 {
        self.short_circuits.get()
    }

    /// Number of timed requests with `outcome`.
    pub fn request_count(&self, outcome: Outcome) -> u64 {
        self.request_duration
            .with_label_values(&[outcome.as_str()])
            .get_sample_count()
    }

    /// Render every metric in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn observe(&self, outcome: Outcome, seconds: f64) {
        self.request_duration
            .with_label_values(&[outcome.as_str()])
            .observe(seconds);
    }
}

/// Scoped request timer.
///
/// Records one duration sample when dropped, so every exit path of a handler
/// is measured. The outcome defaults to [`Outcome::Error`] until set.
pub struct RequestTimer {
    metrics: Option<Arc<GatewayMetrics>>,
    started: Instant,
    outcome: Outcome,
}

impl RequestTimer {
    /// Start timing. With `None` the timer measures nothing.
    pub fn start(metrics: Option<Arc<GatewayMetrics>>) -> Self {
        Self {
            metrics,
            started: Instant::now(),
            outcome: Outcome::Error,
        }
    }

    /// Record how the request ended.
    pub fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(self.outcome, self.started.elapsed().as_secs_f64());
        }
    }
}
