use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Tiers ──

/// Route groups with their own request budget per client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Catalog, availability, lookup: 60 req/min.
    Public,
    /// Reservation creation and edits: 5 req / 5 min.
    Booking,
    /// Back office: 120 req/min.
    Admin,
}

impl Tier {
    pub fn default_limit(self) -> RateLimitConfig {
        match self {
            Tier::Public => RateLimitConfig::new(60, Duration::from_secs(60)),
            Tier::Booking => RateLimitConfig::new(5, Duration::from_secs(300)),
            Tier::Admin => RateLimitConfig::new(120, Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimitConfig {
    pub const fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

// ── Limiter ──

/// Per-tier budgets, fixed once the limiter is built.
#[derive(Debug, Clone, Copy)]
struct TierLimits {
    public: RateLimitConfig,
    booking: RateLimitConfig,
    admin: RateLimitConfig,
}

impl TierLimits {
    fn get(&self, tier: Tier) -> RateLimitConfig {
        match tier {
            Tier::Public => self.public,
            Tier::Booking => self.booking,
            Tier::Admin => self.admin,
        }
    }
}

/// Sliding-window limiter keyed by (tier, client IP).
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limits: TierLimits,
    hits: Arc<DashMap<(Tier, IpAddr), VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limits: TierLimits {
                public: Tier::Public.default_limit(),
                booking: Tier::Booking.default_limit(),
                admin: Tier::Admin.default_limit(),
            },
            hits: Arc::new(DashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_limit(mut self, tier: Tier, config: RateLimitConfig) -> Self {
        match tier {
            Tier::Public => self.limits.public = config,
            Tier::Booking => self.limits.booking = config,
            Tier::Admin => self.limits.admin = config,
        }
        self
    }

    fn limit(&self, tier: Tier) -> RateLimitConfig {
        self.limits.get(tier)
    }

    /// `Err(retry_after_secs)` when `ip` has used up the tier's window.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let config = self.limit(tier);
        let now = Instant::now();
        let mut hits = self.hits.entry((tier, ip)).or_default();

        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= config.window)
        {
            hits.pop_front();
        }

        if hits.len() >= config.max_requests {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + config.window).saturating_duration_since(now).as_secs())
                .unwrap_or(0)
                .max(1);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drops keys with no hit inside twice their window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _), hits| {
            let horizon = self.limit(*tier).window * 2;
            hits.retain(|t| now.duration_since(*t) < horizon);
            !hits.is_empty()
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.hits.len()
    }

    /// Middleware state binding this limiter to one tier.
    pub fn tier(&self, tier: Tier) -> TierGuard {
        TierGuard {
            limiter: self.clone(),
            tier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierGuard {
    limiter: RateLimiter,
    tier: Tier,
}

// ── Middleware ──

/// First X-Forwarded-For entry (reverse proxy), else the socket peer.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error_with_code(
        format!("Muitas requisições. Tente novamente em {} segundos.", retry_after),
        "rate_limited",
    );
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

pub async fn enforce(
    State(guard): State<TierGuard>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    guard.limiter.check(guard.tier, ip).map_err(|retry_after| {
        tracing::warn!("Rate limited {} on {:?} tier", ip, guard.tier);
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::thread::sleep;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn limiter(max: usize, window: Duration) -> RateLimiter {
        RateLimiter::new().with_limit(Tier::Public, RateLimitConfig::new(max, window))
    }

    #[test]
    fn default_tiers() {
        assert_eq!(Tier::Public.default_limit().max_requests, 60);
        assert_eq!(Tier::Booking.default_limit().window, Duration::from_secs(300));
        assert_eq!(Tier::Admin.default_limit().max_requests, 120);
    }

    #[test]
    fn override_touches_only_its_tier() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert_eq!(limiter.limit(Tier::Public).max_requests, 1);
        assert_eq!(limiter.limit(Tier::Booking).max_requests, 5);
        assert_eq!(limiter.limit(Tier::Admin).max_requests, 120);
    }

    #[test]
    fn booking_tier_allows_five_per_window() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(Tier::Booking, ip(1)).is_ok());
        }
        let retry_after = limiter.check(Tier::Booking, ip(1)).unwrap_err();
        assert!((1..=300).contains(&retry_after));
    }

    #[test]
    fn ips_and_tiers_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check(Tier::Public, ip(1)).is_ok());
        assert!(limiter.check(Tier::Public, ip(1)).is_err());
        assert!(limiter.check(Tier::Public, ip(2)).is_ok());
        assert!(limiter.check(Tier::Admin, ip(1)).is_ok());
    }

    #[test]
    fn window_expiry_allows_again() {
        let limiter = limiter(1, Duration::from_millis(100));
        assert!(limiter.check(Tier::Public, ip(1)).is_ok());
        assert!(limiter.check(Tier::Public, ip(1)).is_err());
        sleep(Duration::from_millis(150));
        assert!(limiter.check(Tier::Public, ip(1)).is_ok());
    }

    #[test]
    fn cleanup_drops_only_stale_clients() {
        let limiter = limiter(10, Duration::from_millis(50));
        limiter.check(Tier::Public, ip(1)).unwrap();
        limiter.check(Tier::Admin, ip(1)).unwrap();
        sleep(Duration::from_millis(120));

        limiter.cleanup();
        // admin window is a minute, its entry survives
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&req), "203.0.113.7".parse::<IpAddr>().unwrap());

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&bare), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
