//! Prometheus metrics exporter.
//!
//! Renders the metric state store in Prometheus text format.

use std::fmt::Write;
use std::sync::Arc;

use super::store::MetricsStore;
use crate::domain::LifecycleState;

/// Default metric name prefix.
pub const DEFAULT_NAMESPACE: &str = "ibm_cd";

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Static metadata of one exported metric.
#[derive(Debug, Clone)]
struct MetricDescriptor {
    name: String,
    help: String,
    unit: &'static str,
    kind: MetricKind,
}

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    store: Arc<MetricsStore>,
    namespace: String,
    states: Vec<(LifecycleState, MetricDescriptor)>,
    scrape_errors: MetricDescriptor,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter.
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self::with_namespace(store, DEFAULT_NAMESPACE)
    }

    /// Create a new Prometheus exporter with custom namespace.
    ///
    /// Descriptors for every state the store tracks are built here, once.
    pub fn with_namespace(store: Arc<MetricsStore>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();

        let states = store
            .states()
            .map(|state| {
                let descriptor = MetricDescriptor {
                    name: format!("{}_processes_{}_total", namespace, state.metric_key()),
                    help: format!("Total processes in {} state", state),
                    unit: "1",
                    kind: MetricKind::Gauge,
                };
                (state.clone(), descriptor)
            })
            .collect();

        let scrape_errors = MetricDescriptor {
            name: format!("{}_scrape_errors_total", namespace),
            help: "Total errors when collecting IBM Connect:Direct metrics".to_string(),
            unit: "1",
            kind: MetricKind::Counter,
        };

        Self {
            store,
            namespace,
            states,
            scrape_errors,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let snapshot = self.store.snapshot();
        let mut output = String::new();

        for (state, descriptor) in &self.states {
            let value = snapshot
                .states
                .iter()
                .find(|v| &v.state == state)
                .map(|v| v.value)
                .unwrap_or(0);
            self.write_metric(&mut output, descriptor, value as f64);
        }

        self.write_metric(&mut output, &self.scrape_errors, snapshot.scrape_errors as f64);

        output
    }

    fn write_metric(&self, output: &mut String, descriptor: &MetricDescriptor, value: f64) {
        let name = &descriptor.name;
        // Writing to a String cannot fail.
        let _ = writeln!(output, "# HELP {} {}", name, descriptor.help);
        let _ = writeln!(output, "# TYPE {} {}", name, descriptor.kind.as_str());
        let _ = writeln!(output, "# UNIT {} {}", name, descriptor.unit);
        let _ = writeln!(output, "{} {}", name, value);
    }
}
