use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fake_user_agent::get_rua;

use super::rate_limiter::RateLimiter;

// Challenge pages are small; a marker buried in a long real page is
// almost always just prose about captchas.
const BOT_WALL_MAX_BODY: usize = 60_000;
const BOT_WALL_MARKERS: [&str; 6] = [
    "captcha",
    "cf-browser-verification",
    "attention required",
    "unusual traffic",
    "robot check",
    "just a moment",
];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("http status {0}")]
    BadStatus(u16),
    #[error("blocked by a bot wall")]
    BotWall,
    #[error("connection interrupted: {0}")]
    Interrupted(String),
}

impl FetchError {
    /// Transient failures are worth retrying on a later run. Connection
    /// errors mean the host does not serve https at all, so they are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Connect(_) => false,
            FetchError::BadStatus(status) => *status == 429 || *status >= 500,
            FetchError::BotWall => true,
            FetchError::Interrupted(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait FetchPage: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl HttpFetcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::limited(8))
            .cookie_store(true)
            .build()
            .unwrap();

        Self { client, limiter }
    }
}

#[async_trait]
impl FetchPage for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let domain = host_of(url);
        self.limiter.acquire(&domain).await;

        let response = match self
            .client
            .get(url)
            .header("user-agent", get_rua())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(FetchError::Timeout),
            Err(e) if e.is_connect() => return Err(FetchError::Connect(e.to_string())),
            Err(e) => return Err(FetchError::Interrupted(e.to_string())),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        if status == 429 {
            self.limiter.record_rate_limited(&domain).await;
            return Err(FetchError::BadStatus(429));
        }
        if !(200..400).contains(&status) {
            return Err(FetchError::BadStatus(status));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(FetchError::Timeout),
            Err(e) => return Err(FetchError::Interrupted(e.to_string())),
        };

        if looks_bot_walled(&body) {
            log::info!("{} served a challenge page instead of content", domain);
            return Err(FetchError::BotWall);
        }

        self.limiter.record_success(&domain).await;
        Ok(FetchedPage {
            final_url,
            status,
            body,
        })
    }
}

pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.to_string()))
        .unwrap_or_else(|| url.to_string())
}

fn looks_bot_walled(body: &str) -> bool {
    if body.len() > BOT_WALL_MAX_BODY {
        return false;
    }
    let lowered = body.to_lowercase();
    BOT_WALL_MARKERS.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_page_is_detected() {
        let body = "<html><title>Attention Required! | Cloudflare</title></html>";
        assert!(looks_bot_walled(body));

        let body = "<html><body>Please solve this CAPTCHA to continue</body></html>";
        assert!(looks_bot_walled(body));
    }

    #[test]
    fn ordinary_page_is_not_a_bot_wall() {
        let body = "<html><title>Acme Soluciones</title><body>Somos una empresa familiar</body></html>";
        assert!(!looks_bot_walled(body));
    }

    #[test]
    fn long_pages_mentioning_captcha_are_kept() {
        let mut body = String::from("<html><body>");
        body.push_str(&"relleno ".repeat(10_000));
        body.push_str("este formulario usa captcha</body></html>");
        assert!(!looks_bot_walled(&body));
    }

    #[test]
    fn host_extraction_handles_ports_and_paths() {
        assert_eq!(host_of("https://www.acme.es/contacto"), "www.acme.es");
        assert_eq!(host_of("http://acme.es:8080/"), "acme.es");
        assert_eq!(host_of("not a url"), "not a url");
    }

    #[test]
    fn transient_and_permanent_errors_are_classified() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::BadStatus(500).is_transient());
        assert!(FetchError::BadStatus(429).is_transient());
        assert!(FetchError::BotWall.is_transient());
        assert!(FetchError::Interrupted("connection reset by peer".to_string()).is_transient());

        assert!(!FetchError::Connect("dns failure".to_string()).is_transient());
        assert!(!FetchError::BadStatus(404).is_transient());
        assert!(!FetchError::BadStatus(403).is_transient());
    }
}
