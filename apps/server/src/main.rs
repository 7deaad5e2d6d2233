mod alert_layer;
mod config;
mod engine;
mod handlers;
mod models;
mod rate_limit;
mod store;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use config::Config;
use engine::clock::StudioClock;
use engine::BookingService;
use rate_limit::{RateLimiter, Tier};
use store::migrate::default_catalog;
use store::{BookingStore, MemoryStore, SqliteStore};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub service: BookingService,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Tracing: console + optional webhook alerts (URL read before init) ──
    let alert_webhook_url = std::env::var("ALERT_WEBHOOK_URL")
        .ok()
        .filter(|url| !url.trim().is_empty());

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(url) = alert_webhook_url {
        let alerts = alert_layer::AlertLayer::new(url, env!("CARGO_PKG_NAME"));
        registry.with(alerts).init();
    } else {
        registry.init();
    }

    let config = Config::from_env();

    // ── Store + booking service ──
    let store: Arc<dyn BookingStore> = if config.uses_memory_store() {
        tracing::warn!("DATABASE_URL=memory: bookings are kept in memory and lost on restart");
        Arc::new(MemoryStore::with_procedures(default_catalog()))
    } else {
        Arc::new(SqliteStore::connect(&config.database_url).await?)
    };
    let clock = StudioClock::with_utc_offset_hours(config.studio_utc_offset_hours);
    let service = BookingService::new(store, clock)
        .with_horizon_days(config.availability_horizon_days)
        .with_maintenance_period_days(config.maintenance_period_days);

    let state = Arc::new(AppState {
        service,
        started_at: Instant::now(),
    });

    // ── Rate limiter + periodic cleanup ──
    let rate_limiter = RateLimiter::new();

    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
            tracing::debug!(
                "Rate limiter cleanup: {} clients tracked",
                cleanup_limiter.tracked_clients()
            );
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = match &config.webapp_url {
        Some(url) => {
            let origins: Vec<axum::http::HeaderValue> = vec![
                url.parse()?,
                axum::http::HeaderValue::from_static("http://localhost:5173"), // Vite dev server
            ];
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state, &rate_limiter)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.bind_addr();
    tracing::info!("Lash studio server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ── Router (4 groups with per-group rate limits) ──

fn router(state: Arc<AppState>, rate_limiter: &RateLimiter) -> Router {
    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: catalog, availability, self-service lookup and cancel
    let public_routes = Router::new()
        .route("/api/procedures", get(handlers::client::list_procedures))
        .route("/api/availability", get(handlers::client::availability))
        .route(
            "/api/bookings/lookup",
            get(handlers::client::lookup_bookings),
        )
        .route(
            "/api/bookings/{id}/cancel",
            post(handlers::client::cancel_booking),
        )
        .layer(from_fn_with_state(
            rate_limiter.tier(Tier::Public),
            rate_limit::enforce,
        ));

    // 3. Reservation create/edit: strictest limit
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_booking))
        .route("/api/bookings/{id}", put(handlers::client::edit_booking))
        .layer(from_fn_with_state(
            rate_limiter.tier(Tier::Booking),
            rate_limit::enforce,
        ));

    // 4. Admin back office
    let admin_routes = Router::new()
        .route(
            "/api/admin/schedule",
            get(handlers::admin::get_schedule).put(handlers::admin::update_schedule),
        )
        .route(
            "/api/admin/procedures",
            get(handlers::admin::list_procedures).post(handlers::admin::create_procedure),
        )
        .route(
            "/api/admin/procedures/defaults",
            post(handlers::admin::restore_default_procedures),
        )
        .route(
            "/api/admin/procedures/{id}",
            put(handlers::admin::update_procedure).delete(handlers::admin::delete_procedure),
        )
        .route(
            "/api/admin/bookings",
            get(handlers::admin::list_bookings).post(handlers::admin::create_booking),
        )
        .route(
            "/api/admin/bookings/{id}",
            put(handlers::admin::edit_booking).delete(handlers::admin::discard_booking),
        )
        .route(
            "/api/admin/bookings/{id}/status",
            put(handlers::admin::set_booking_status),
        )
        .route(
            "/api/admin/bookings/{id}/reminder-sent",
            post(handlers::admin::mark_reminder_sent),
        )
        .route(
            "/api/admin/bookings/{id}/maintenance-sent",
            post(handlers::admin::mark_maintenance_sent),
        )
        .route("/api/admin/clients", get(handlers::admin::list_clients))
        .route("/api/admin/reminders", get(handlers::admin::due_reminders))
        .route(
            "/api/admin/maintenance",
            get(handlers::admin::maintenance_due),
        )
        .route("/api/admin/revenue", get(handlers::admin::revenue))
        .layer(from_fn_with_state(
            rate_limiter.tier(Tier::Admin),
            rate_limit::enforce,
        ));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(admin_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use chrono::NaiveDateTime;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let store = MemoryStore::with_procedures(default_catalog());
        let at = NaiveDateTime::parse_from_str("2026-03-01 12:00", "%Y-%m-%d %H:%M").unwrap();
        let service = BookingService::new(Arc::new(store), StudioClock::pinned(at));
        let state = Arc::new(AppState {
            service,
            started_at: Instant::now(),
        });
        router(state, &RateLimiter::new())
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn reservation(start: &str) -> Value {
        // procedure 1 is the 120-minute "Volume Brasileiro"
        json!({
            "procedure_id": 1,
            "date": "2026-03-02",
            "start_time": start,
            "name": "Ana Souza",
            "contact": "(11) 98765-4321",
        })
    }

    #[tokio::test]
    async fn health_reports_store_ok() {
        let (status, body) = send(&app(), Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store_ok"], true);
    }

    #[tokio::test]
    async fn availability_is_keyed_by_date() {
        let (status, body) =
            send(&app(), Method::GET, "/api/availability?horizon_days=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        // Sunday is closed, Monday opens at 08:00
        assert!(body["data"].get("2026-03-01").is_none());
        assert_eq!(body["data"]["2026-03-02"][0], "08:00");
    }

    #[tokio::test]
    async fn unknown_procedure_is_404() {
        let (status, body) = send(
            &app(),
            Method::GET,
            "/api/availability?procedure_id=999",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn overlapping_admin_booking_is_409() {
        let app = app();
        let (status, body) =
            send(&app, Method::POST, "/api/admin/bookings", Some(reservation("10:00"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "confirmed");

        let (status, body) =
            send(&app, Method::POST, "/api/admin/bookings", Some(reservation("11:00"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "slot_conflict");
    }

    #[tokio::test]
    async fn client_booking_then_lookup_and_cancel() {
        let app = app();
        let (status, body) =
            send(&app, Method::POST, "/api/bookings", Some(reservation("14:00"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");
        let id = body["data"]["id"].as_i64().unwrap();

        let (_, body) = send(&app, Method::GET, "/api/bookings/lookup?contact=98765-4321", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let uri = format!("/api/bookings/{id}/cancel");
        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");

        let (status, body) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "invalid_transition");
    }

    #[tokio::test]
    async fn client_directory_lists_each_contact_once() {
        let app = app();
        let mut first = reservation("08:00");
        first["birth_date"] = json!("1990-03-01");
        send(&app, Method::POST, "/api/admin/bookings", Some(first)).await;
        send(&app, Method::POST, "/api/admin/bookings", Some(reservation("14:00"))).await;

        let (status, body) = send(&app, Method::GET, "/api/admin/clients", None).await;
        assert_eq!(status, StatusCode::OK);
        let clients = body["data"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["birth_date"], "1990-03-01");
        assert_eq!(clients[0]["booking_count"], 2);

        let (_, body) = send(&app, Method::GET, "/api/admin/clients?birthdays=today", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn booking_tier_is_rate_limited() {
        let app = app();
        // invalid bodies still count against the tier
        let bad = json!({ "procedure_id": 1, "date": "2026-03-02", "start_time": "10:00", "name": "A", "contact": "1" });
        for _ in 0..5 {
            let (status, _) = send(&app, Method::POST, "/api/bookings", Some(bad.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        let (status, body) = send(&app, Method::POST, "/api/bookings", Some(bad)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "rate_limited");
    }
}
