use crate::config::LogLevel;
use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "sqlsweep";
const REST_DURATION_BUCKETS: [f64; 8] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Installs the process-wide subscriber. The configured engine level supplies
/// the default filter; `RUST_LOG` still overrides when set.
pub fn init_tracing(level: LogLevel) -> Result<()> {
    let default_directives = match level {
        LogLevel::Minimal => "sqlsweep=warn,warn",
        LogLevel::Info => "sqlsweep=info,info",
        LogLevel::Verbose => "sqlsweep=debug,info",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", metadata.target());
        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}

/// Process-wide counters for the management-plane traffic and failover
/// outcomes of the current sweep. Tests read these through [`snapshot`].
#[derive(Default)]
pub struct RuntimeCounters {
    failovers_initiated: AtomicU64,
    poll_sweeps: AtomicU64,
    targets_succeeded: AtomicU64,
    targets_skipped: AtomicU64,
    targets_failed: AtomicU64,
    rest_requests: RestRequestMetrics,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub failovers_initiated: u64,
    pub poll_sweeps: u64,
    pub targets_succeeded: u64,
    pub targets_skipped: u64,
    pub targets_failed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestRequestCountSnapshot {
    pub operation: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RestDurationSnapshot {
    pub operation: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RestMetricsSnapshot {
    pub requests: Vec<RestRequestCountSnapshot>,
    pub durations: Vec<RestDurationSnapshot>,
}

#[derive(Default)]
struct RestRequestMetrics {
    counts: Mutex<HashMap<(String, u16), u64>>,
    durations: Mutex<BTreeMap<String, RestDurationBuckets>>,
}

impl RestRequestMetrics {
    fn record(&self, operation: &str, status: u16, duration: Duration) {
        let mut counts = self.counts.lock().expect("rest request counts poisoned");
        *counts.entry((operation.to_string(), status)).or_insert(0) += 1;
        drop(counts);

        let mut durations = self
            .durations
            .lock()
            .expect("rest request durations poisoned");
        let entry = durations.entry(operation.to_string()).or_default();
        entry.observe(duration.as_secs_f64());
    }

    fn snapshot(&self) -> RestMetricsSnapshot {
        let counts_guard = self.counts.lock().expect("rest request counts poisoned");
        let durations_guard = self
            .durations
            .lock()
            .expect("rest request durations poisoned");

        let requests = counts_guard
            .iter()
            .map(|((operation, status), total)| RestRequestCountSnapshot {
                operation: operation.clone(),
                status_code: *status,
                total: *total,
            })
            .collect();

        let durations = durations_guard
            .iter()
            .map(|(operation, buckets)| RestDurationSnapshot {
                operation: operation.clone(),
                buckets: buckets.histogram(),
                sum: buckets.sum,
                count: buckets.total,
            })
            .collect();

        RestMetricsSnapshot {
            requests,
            durations,
        }
    }
}

#[derive(Default)]
struct RestDurationBuckets {
    counts: [u64; REST_DURATION_BUCKETS.len()],
    sum: f64,
    total: u64,
}

impl RestDurationBuckets {
    fn observe(&mut self, duration_secs: f64) {
        for (idx, boundary) in REST_DURATION_BUCKETS.iter().enumerate() {
            if duration_secs <= *boundary {
                self.counts[idx] += 1;
            }
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0;
        REST_DURATION_BUCKETS
            .iter()
            .enumerate()
            .map(|(idx, boundary)| {
                cumulative += self.counts[idx];
                (*boundary, cumulative)
            })
            .collect()
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_failovers_initiated(&self) {
        self.failovers_initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_poll_sweeps(&self) {
        self.poll_sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_targets_succeeded(&self) {
        self.targets_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_targets_skipped(&self) {
        self.targets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_targets_failed(&self) {
        self.targets_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rest_request(&self, operation: &str, status: u16, duration: Duration) {
        self.rest_requests.record(operation, status, duration);
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            failovers_initiated: self.failovers_initiated.load(Ordering::Relaxed),
            poll_sweeps: self.poll_sweeps.load(Ordering::Relaxed),
            targets_succeeded: self.targets_succeeded.load(Ordering::Relaxed),
            targets_skipped: self.targets_skipped.load(Ordering::Relaxed),
            targets_failed: self.targets_failed.load(Ordering::Relaxed),
        }
    }

    pub fn rest_metrics_snapshot(&self) -> RestMetricsSnapshot {
        self.rest_requests.snapshot()
    }
}
