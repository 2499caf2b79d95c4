use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

const WINDOW: Duration = Duration::from_secs(1);
const PUBLIC_PREFIX: &str = "/api/public/sessions/";

#[derive(Debug)]
struct WindowState {
    start: Instant,
    count: u32,
}

/// Fixed one-second window per access link, so one participant hammering the
/// activity endpoint cannot starve the others.
#[derive(Clone, Debug)]
pub struct LinkRateLimiter {
    rps: u32,
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
}

impl LinkRateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn allow(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, w| now.duration_since(w.start) < WINDOW);

        let window = windows.entry(key.to_string()).or_insert(WindowState {
            start: now,
            count: 0,
        });
        if window.count < self.rps {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

fn link_token(path: &str) -> Option<&str> {
    path.strip_prefix(PUBLIC_PREFIX)?
        .split('/')
        .next()
        .filter(|t| !t.is_empty())
}

pub async fn per_link_limit(
    State(limiter): State<LinkRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = link_token(req.uri().path()) {
        if !limiter.allow(token, Instant::now()) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "rate_limit_exceeded" })),
            )
                .into_response();
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_from_public_paths() {
        assert_eq!(link_token("/api/public/sessions/abc123/next"), Some("abc123"));
        assert_eq!(link_token("/api/public/sessions/abc123"), Some("abc123"));
        assert_eq!(link_token("/api/admin/sessions"), None);
    }

    #[test]
    fn budget_is_tracked_per_link() {
        let limiter = LinkRateLimiter::new(2);
        let now = Instant::now();
        assert!(limiter.allow("a", now));
        assert!(limiter.allow("a", now));
        assert!(!limiter.allow("a", now));
        assert!(limiter.allow("b", now));
        assert!(limiter.allow("a", now + WINDOW));
    }
}
