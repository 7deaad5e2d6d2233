//! Tracing layer that posts ERROR events to an alert webhook as JSON.
//!
//! At most one alert goes out per `MIN_INTERVAL`, and an identical message
//! is suppressed for `DEDUP_WINDOW`. Sends are spawned onto the tokio runtime.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

// ── Throttle ──

struct Throttle {
    last_sent: Option<Instant>,
    /// (message hash, sent_at)
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            last_sent: None,
            recent: Vec::new(),
        }
    }

    /// Records and admits the message if neither the interval nor the
    /// dedup window holds it back.
    fn admit(&mut self, hash: u64, now: Instant) -> bool {
        self.recent
            .retain(|(_, at)| now.saturating_duration_since(*at) < DEDUP_WINDOW);

        let duplicate = self.recent.iter().any(|(h, _)| *h == hash);
        let too_soon = self
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < MIN_INTERVAL);
        if duplicate || too_soon {
            return false;
        }

        self.last_sent = Some(now);
        self.recent.push((hash, now));
        true
    }
}

fn message_hash(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

// ── Layer ──

pub struct AlertLayer {
    webhook_url: String,
    service: &'static str,
    http: reqwest::Client,
    throttle: Mutex<Throttle>,
}

impl AlertLayer {
    pub fn new(webhook_url: String, service: &'static str) -> Self {
        Self {
            webhook_url,
            service,
            http: reqwest::Client::new(),
            throttle: Mutex::new(Throttle::new()),
        }
    }

    fn payload(&self, event: &Event<'_>, message: &str) -> serde_json::Value {
        let meta = event.metadata();
        serde_json::json!({
            "service": self.service,
            "level": meta.level().as_str(),
            "message": message,
            "target": meta.target(),
            "location": format!("{}:{}", meta.file().unwrap_or("?"), meta.line().unwrap_or(0)),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message();

        let admitted = match self.throttle.lock() {
            Ok(mut throttle) => throttle.admit(message_hash(&message), Instant::now()),
            Err(_) => false,
        };
        if !admitted {
            return;
        }

        // No runtime (e.g. during shutdown): drop the alert.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let body = self.payload(event, &message);
        let client = self.http.clone();
        let url = self.webhook_url.clone();
        runtime.spawn(async move {
            let _ = client.post(&url).json(&body).send().await;
        });
    }
}

// ── Field visitor ──

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl MessageVisitor {
    /// The message plus any structured fields as `k=v`.
    fn message(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        if self.message.is_empty() {
            extras
        } else {
            format!("{} ({})", self.message, extras)
        }
    }

    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.push(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_alert_goes_out() {
        let mut throttle = Throttle::new();
        assert!(throttle.admit(1, Instant::now()));
    }

    #[test]
    fn second_alert_within_interval_is_held() {
        let mut throttle = Throttle::new();
        let t0 = Instant::now();
        assert!(throttle.admit(1, t0));
        assert!(!throttle.admit(2, t0 + Duration::from_secs(3)));
        assert!(throttle.admit(2, t0 + MIN_INTERVAL));
    }

    #[test]
    fn identical_message_is_deduplicated_for_the_window() {
        let mut throttle = Throttle::new();
        let t0 = Instant::now();
        assert!(throttle.admit(7, t0));
        assert!(!throttle.admit(7, t0 + MIN_INTERVAL + Duration::from_secs(1)));
        assert!(throttle.admit(7, t0 + DEDUP_WINDOW + Duration::from_secs(1)));
    }

    #[test]
    fn same_text_same_hash() {
        assert_eq!(message_hash("store unavailable"), message_hash("store unavailable"));
        assert_ne!(message_hash("a"), message_hash("b"));
    }

    #[test]
    fn visitor_joins_fields() {
        let v = MessageVisitor {
            message: "reserve: store unavailable".into(),
            fields: vec![("booking_id".into(), "42".into())],
        };
        assert_eq!(v.message(), "reserve: store unavailable (booking_id=42)");

        let fields_only = MessageVisitor {
            message: String::new(),
            fields: vec![("error".into(), "timeout".into())],
        };
        assert_eq!(fields_only.message(), "error=timeout");
    }
}
