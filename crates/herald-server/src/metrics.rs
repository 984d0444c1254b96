use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "herald";

/// Counter hooks fired by the request handler and the dispatcher.
pub trait Metrics: Send + Sync {
    fn http_request(&self);
    fn unauthorized_request(&self);
    fn unsupported_method(&self, method: &str);
    fn invalid_payload(&self);
    fn alert_received(&self, room: &str);
    fn render_succeeded(&self);
    fn render_failed(&self);
    fn join_succeeded(&self, room: &str);
    fn join_failed(&self, room: &str);
    fn send_succeeded(&self);
    fn send_failed(&self);

    /// Text exposition of the current values, if the sink supports it.
    fn encode(&self) -> Option<String> {
        None
    }
}

/// Prometheus counters registered in a registry owned by this value.
pub struct PrometheusMetrics {
    registry: Registry,
    http_requests: IntCounter,
    unauthorized_requests: IntCounter,
    unsupported_methods: IntCounterVec,
    invalid_payloads: IntCounter,
    alerts: IntCounterVec,
    templating_success: IntCounter,
    templating_failure: IntCounter,
    join_success: IntCounterVec,
    join_failure: IntCounterVec,
    send_success: IntCounter,
    send_failure: IntCounter,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let counter_vec =
            |name: &str, help: &str, label: &str| -> Result<IntCounterVec, prometheus::Error> {
                let c = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &[label])?;
                registry.register(Box::new(c.clone()))?;
                Ok(c)
            };

        Ok(Self {
            http_requests: counter(
                "http_requests_total",
                "The total number of HTTP requests received at the alerts endpoint",
            )?,
            unauthorized_requests: counter(
                "unauthorized_http_requests_total",
                "The total number of HTTP requests without valid credentials",
            )?,
            unsupported_methods: counter_vec(
                "unsupported_http_method_total",
                "The total number of HTTP requests using unsupported HTTP methods",
                "method",
            )?,
            invalid_payloads: counter(
                "invalid_payload_total",
                "The total number of HTTP requests that contain invalid payload data",
            )?,
            alerts: counter_vec(
                "alerts_total",
                "The total number of alerts processed",
                "room",
            )?,
            templating_success: counter(
                "templating_success_total",
                "The total number of successful templating operations",
            )?,
            templating_failure: counter(
                "templating_failure_total",
                "The total number of failed templating operations",
            )?,
            join_success: counter_vec(
                "join_room_success_total",
                "The total number of successful join room operations",
                "room",
            )?,
            join_failure: counter_vec(
                "join_room_failure_total",
                "The total number of failed join room operations",
                "room",
            )?,
            send_success: counter(
                "send_success_total",
                "The total number of successful send operations",
            )?,
            send_failure: counter(
                "send_failure_total",
                "The total number of failed send operations",
            )?,
            registry,
        })
    }
}

impl Metrics for PrometheusMetrics {
    fn http_request(&self) {
        self.http_requests.inc();
    }

    fn unauthorized_request(&self) {
        self.unauthorized_requests.inc();
    }

    fn unsupported_method(&self, method: &str) {
        self.unsupported_methods.with_label_values(&[method]).inc();
    }

    fn invalid_payload(&self) {
        self.invalid_payloads.inc();
    }

    fn alert_received(&self, room: &str) {
        self.alerts.with_label_values(&[room]).inc();
    }

    fn render_succeeded(&self) {
        self.templating_success.inc();
    }

    fn render_failed(&self) {
        self.templating_failure.inc();
    }

    fn join_succeeded(&self, room: &str) {
        self.join_success.with_label_values(&[room]).inc();
    }

    fn join_failed(&self, room: &str) {
        self.join_failure.with_label_values(&[room]).inc();
    }

    fn send_succeeded(&self) {
        self.send_success.inc();
    }

    fn send_failed(&self) {
        self.send_failure.inc();
    }

    fn encode(&self) -> Option<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .ok()
    }
}
