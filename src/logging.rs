//! Log output and timestamps.
//!
//! JSON lines look like:
//! ```json
//! {"ts":"2026-03-01T15:04:05.123Z","level":"info","type":"app","msg":"runtime ready","ctx":{"service":"tokio_dispatch"},"data":{"addr":"0.0.0.0:8080"}}
//! ```
//!
//! Events with target `access` become `"type":"access"` records whose
//! message is `METHOD /path STATUS`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig, DEFAULT_FILTER};

/// Install the global subscriber.
///
/// Fails when a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|e| {
        eprintln!("Warning: invalid log filter '{}': {}", config.filter, e);
        EnvFilter::new(DEFAULT_FILTER)
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(&config.service_name)),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init(),
    }
}

/// One finished request, for the access log.
#[derive(Debug)]
pub struct AccessRecord<'a> {
    pub remote: Option<SocketAddr>,
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub http: &'a str,
    pub status: u16,
    pub duration: Duration,
    pub user_agent: Option<&'a str>,
}

/// Emit an access record under the `access` target.
pub fn log_access(record: &AccessRecord<'_>) {
    let ip = record
        .remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();
    tracing::info!(
        target: "access",
        ip = %ip,
        method = record.method,
        path = record.path,
        query = record.query.unwrap_or(""),
        http = record.http,
        status = record.status as u64,
        duration_ms = record.duration.as_secs_f64() * 1000.0,
        ua = record.user_agent.unwrap_or(""),
    );
}

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(
        &self,
        level: &Level,
        target: &str,
        visitor: FieldVisitor,
        ts: &str,
    ) -> serde_json::Value {
        let log_type = if target == "access" {
            "access"
        } else if *level == Level::ERROR {
            "error"
        } else {
            "app"
        };
        let level = match *level {
            Level::TRACE | Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };

        let msg = if log_type == "access" {
            let field = |name: &str| {
                visitor
                    .fields
                    .get(name)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| "?".to_string())
            };
            format!("{} {} {}", field("method"), field("path"), field("status"))
        } else {
            visitor.message.unwrap_or_default()
        };

        let mut ctx = serde_json::Map::new();
        ctx.insert("service".into(), serde_json::json!(self.service_name));
        if let Some(thread) = std::thread::current().name() {
            ctx.insert("thread".into(), serde_json::json!(thread));
        }

        serde_json::json!({
            "ts": ts,
            "level": level,
            "type": log_type,
            "msg": msg,
            "ctx": ctx,
            "data": visitor.fields,
        })
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let ts = CivilTime::now().iso8601();
        let meta = event.metadata();
        let entry = self.entry(meta.level(), meta.target(), visitor, &ts);
        writeln!(
            writer,
            "{}",
            serde_json::to_string(&entry).unwrap_or_default()
        )
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, serde_json::Value>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(text.trim_matches('"').to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::String(text));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::json!(value));
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }
}

const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// UTC calendar time, for log timestamps and the `Date` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millis: u32,
    weekday: usize,
}

impl CivilTime {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Times before the epoch clamp to the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = since.as_secs() as i64;
        let days = secs.div_euclid(86_400);
        let day_secs = secs.rem_euclid(86_400) as u32;

        // Days-to-civil conversion over 400-year eras
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year,
            month,
            day,
            hour: day_secs / 3600,
            minute: (day_secs % 3600) / 60,
            second: day_secs % 60,
            millis: since.subsec_millis(),
            weekday: days.rem_euclid(7) as usize,
        }
    }

    /// `2026-03-01T15:04:05.123Z`
    pub fn iso8601(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millis
        )
    }

    /// `Sun, 01 Mar 2026 15:04:05 GMT`
    pub fn http_date(&self) -> String {
        format!(
            "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
            WEEKDAYS[self.weekday],
            self.day,
            MONTHS[(self.month - 1) as usize],
            self.year,
            self.hour,
            self.minute,
            self.second
        )
    }
}
