use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const BACKOFF_BASE: Duration = Duration::from_secs(30);
const BACKOFF_MAX: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub per_domain_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            per_domain_per_minute: 10,
        }
    }
}

#[derive(Default)]
struct DomainWindow {
    recent: VecDeque<Instant>,
    consecutive_429s: u32,
    backoff_until: Option<Instant>,
}

struct Windows {
    global: VecDeque<Instant>,
    domains: HashMap<String, DomainWindow>,
}

enum Admission {
    Admitted,
    WaitUntil(Instant),
}

/// Sliding-window limiter shared by every worker loop in the process.
/// A request is admitted only when both the global and the per-domain
/// windows have room, otherwise the caller sleeps until a slot opens.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows {
                global: VecDeque::new(),
                domains: HashMap::new(),
            }),
        }
    }

    pub async fn acquire(&self, domain: &str) {
        loop {
            let now = Instant::now();
            let admission = {
                let mut windows = self.windows.lock().await;
                Self::try_admit(&self.config, &mut windows, domain, now)
            };
            match admission {
                Admission::Admitted => return,
                Admission::WaitUntil(when) => tokio::time::sleep_until(when).await,
            }
        }
    }

    fn try_admit(
        config: &RateLimitConfig,
        windows: &mut Windows,
        domain: &str,
        now: Instant,
    ) -> Admission {
        prune(&mut windows.global, now);
        let domain_window = windows.domains.entry(domain.to_string()).or_default();
        prune(&mut domain_window.recent, now);

        if let Some(until) = domain_window.backoff_until {
            if until > now {
                return Admission::WaitUntil(until);
            }
            domain_window.backoff_until = None;
        }

        if windows.global.len() >= config.requests_per_minute as usize {
            let reopen = windows
                .global
                .front()
                .map(|oldest| *oldest + WINDOW)
                .unwrap_or(now);
            return Admission::WaitUntil(reopen);
        }

        if domain_window.recent.len() >= config.per_domain_per_minute as usize {
            let reopen = domain_window
                .recent
                .front()
                .map(|oldest| *oldest + WINDOW)
                .unwrap_or(now);
            return Admission::WaitUntil(reopen);
        }

        windows.global.push_back(now);
        domain_window.recent.push_back(now);
        Admission::Admitted
    }

    /// A 429 from the domain doubles its cool-off, up to ten minutes.
    pub async fn record_rate_limited(&self, domain: &str) {
        let mut windows = self.windows.lock().await;
        let domain_window = windows.domains.entry(domain.to_string()).or_default();
        domain_window.consecutive_429s += 1;

        let exponent = domain_window.consecutive_429s.saturating_sub(1).min(4);
        let backoff = (BACKOFF_BASE * 2u32.saturating_pow(exponent)).min(BACKOFF_MAX);
        domain_window.backoff_until = Some(Instant::now() + backoff);

        log::warn!(
            "{} asked us to slow down ({} in a row), backing off {:?}",
            domain,
            domain_window.consecutive_429s,
            backoff
        );
    }

    pub async fn record_success(&self, domain: &str) {
        let mut windows = self.windows.lock().await;
        if let Some(domain_window) = windows.domains.get_mut(domain) {
            domain_window.consecutive_429s = 0;
        }
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: u32, per_domain: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_minute: global,
            per_domain_per_minute: per_domain,
        })
    }

    fn admit(limiter: &RateLimiter, windows: &mut Windows, domain: &str, now: Instant) -> bool {
        matches!(
            RateLimiter::try_admit(&limiter.config, windows, domain, now),
            Admission::Admitted
        )
    }

    #[tokio::test]
    async fn global_window_caps_total_requests() {
        let limiter = limiter(3, 10);
        let mut windows = limiter.windows.lock().await;
        let now = Instant::now();

        assert!(admit(&limiter, &mut windows, "a.es", now));
        assert!(admit(&limiter, &mut windows, "b.es", now));
        assert!(admit(&limiter, &mut windows, "c.es", now));
        assert!(!admit(&limiter, &mut windows, "d.es", now));
    }

    #[tokio::test]
    async fn per_domain_window_is_tighter_than_global() {
        let limiter = limiter(10, 2);
        let mut windows = limiter.windows.lock().await;
        let now = Instant::now();

        assert!(admit(&limiter, &mut windows, "acme.es", now));
        assert!(admit(&limiter, &mut windows, "acme.es", now));
        assert!(!admit(&limiter, &mut windows, "acme.es", now));
        // other domains still have room
        assert!(admit(&limiter, &mut windows, "other.es", now));
    }

    #[tokio::test]
    async fn window_slides_after_a_minute() {
        let limiter = limiter(1, 1);
        let mut windows = limiter.windows.lock().await;

        let start = Instant::now();
        assert!(admit(&limiter, &mut windows, "acme.es", start));
        assert!(!admit(&limiter, &mut windows, "acme.es", start));
        // the same request viewed 61 seconds later is outside the window
        assert!(admit(&limiter, &mut windows, "acme.es", start + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn full_window_reports_when_it_reopens() {
        let limiter = limiter(1, 1);
        let mut windows = limiter.windows.lock().await;
        let now = Instant::now();

        assert!(admit(&limiter, &mut windows, "acme.es", now));
        match RateLimiter::try_admit(&limiter.config, &mut windows, "acme.es", now) {
            Admission::WaitUntil(when) => assert_eq!(when, now + WINDOW),
            Admission::Admitted => panic!("window should be full"),
        }
    }

    #[tokio::test]
    async fn repeated_429s_double_the_backoff() {
        let limiter = limiter(100, 100);
        limiter.record_rate_limited("acme.es").await;
        limiter.record_rate_limited("acme.es").await;

        let mut windows = limiter.windows.lock().await;
        let backoff_until = windows.domains.get("acme.es").unwrap().backoff_until.unwrap();
        let remaining = backoff_until - Instant::now();
        // second hit backs off for about a minute
        assert!(remaining > Duration::from_secs(55));
        assert!(remaining <= Duration::from_secs(60));

        assert!(!admit(&limiter, &mut windows, "acme.es", Instant::now()));
        // other domains are unaffected by the backoff
        assert!(admit(&limiter, &mut windows, "other.es", Instant::now()));
    }

    #[tokio::test]
    async fn backoff_caps_at_ten_minutes() {
        let limiter = limiter(100, 100);
        for _ in 0..12 {
            limiter.record_rate_limited("acme.es").await;
        }

        let windows = limiter.windows.lock().await;
        let backoff_until = windows.domains.get("acme.es").unwrap().backoff_until.unwrap();
        assert!(backoff_until - Instant::now() <= BACKOFF_MAX);
    }

    #[tokio::test]
    async fn success_clears_the_429_streak() {
        let limiter = limiter(100, 100);
        limiter.record_rate_limited("acme.es").await;
        limiter.record_success("acme.es").await;

        let windows = limiter.windows.lock().await;
        assert_eq!(windows.domains.get("acme.es").unwrap().consecutive_429s, 0);
    }
}
