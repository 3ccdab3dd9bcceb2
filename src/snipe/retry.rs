//! Rate-limited, retrying request executor for the Snipe-IT API.
//!
//! Snipe-IT instances enforce a per-minute request budget, and busy ones
//! answer 429/5xx under load. Every call goes through [`SnipeHttp::execute`],
//! which tracks a rolling attempt counter against the configured limit and
//! retries throttled/failed requests with a fixed 60-second backoff,
//! matching the server's one-minute window. No exponential backoff here.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attempt budget for one logical request, retries included.
pub const MAX_ATTEMPTS: u32 = 5;

/// Flat pause before any retry and when the local rate window fills up.
pub const BACKOFF: Duration = Duration::from_secs(60);

/// How a single attempt's outcome is treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Any status below 500 that is not 429; handed back to the caller
    /// (callers interpret 4xx bodies themselves).
    Done,
    /// HTTP 429.
    Throttled,
    /// HTTP 500+.
    ServerError,
    /// Timeout / connection failure; no status available.
    Transport,
}

pub fn classify(status: Option<StatusCode>) -> Disposition {
    match status {
        Some(StatusCode::TOO_MANY_REQUESTS) => Disposition::Throttled,
        Some(s) if s.is_server_error() => Disposition::ServerError,
        Some(_) => Disposition::Done,
        None => Disposition::Transport,
    }
}

/// What the loop does next after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Hand the response to the caller.
    Done,
    /// Sleep [`BACKOFF`] and try again; `reset_window` additionally clears
    /// the local rate counter.
    Retry { reset_window: bool },
    /// Budget exhausted; surface a terminal failure.
    GiveUp,
}

/// Attempt bookkeeping for one logical request. Pure so the retry contract
/// is testable without a server.
#[derive(Debug, Default)]
pub struct RetrySession {
    attempts: u32,
}

impl RetrySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts made so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one attempt's outcome and decide what happens next.
    pub fn on_attempt(&mut self, disposition: Disposition) -> NextAction {
        self.attempts += 1;
        match disposition {
            Disposition::Done => NextAction::Done,
            _ if self.attempts >= MAX_ATTEMPTS => NextAction::GiveUp,
            Disposition::ServerError => NextAction::Retry { reset_window: true },
            Disposition::Throttled | Disposition::Transport => {
                NextAction::Retry { reset_window: false }
            }
        }
    }
}

/// Rolling counter against the instance's per-minute request budget.
/// Counts attempts, not logical requests: a retried call burns budget
/// once per wire round trip.
#[derive(Debug)]
pub struct RateWindow {
    count: u32,
    limit: u32,
}

impl RateWindow {
    pub fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// True when the next attempt must wait out the window first.
    /// `record` resets the count after a pause via [`RateWindow::reset`].
    pub fn is_full(&self) -> bool {
        self.count >= self.limit
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Request executor owning the reqwest client, auth header, and the rate
/// window for one Snipe-IT instance.
pub struct SnipeHttp {
    client: Client,
    base_url: String,
    api_key: String,
    window: RateWindow,
}

impl SnipeHttp {
    pub fn new(base_url: &str, api_key: &str, rate_limit: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Snipe-IT http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            window: RateWindow::new(rate_limit),
        })
    }

    /// Issue `method path` with optional query params and JSON body,
    /// retrying per the module policy. Returns the response for any status
    /// below 500 (except 429); callers branch on the body. Exhausting the
    /// attempt budget returns an error the caller must treat as "request
    /// did not succeed", never unwrap mid-loop.
    pub async fn execute(
        &mut self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut session = RetrySession::new();

        loop {
            if self.window.is_full() {
                warn!(
                    limit = self.window.limit,
                    "snipe: request budget for this minute spent, pausing 60s"
                );
                sleep(BACKOFF).await;
                self.window.reset();
            }
            self.window.record();

            debug!(%method, %url, attempt = session.attempts() + 1, "snipe: sending request");
            let mut req = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.api_key)
                .header("accept", "application/json");
            if let Some(q) = query {
                req = req.query(q);
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            let disposition = match req.send().await {
                Ok(resp) => {
                    let disposition = classify(Some(resp.status()));
                    if disposition == Disposition::Done {
                        session.on_attempt(disposition);
                        return Ok(resp);
                    }
                    disposition
                }
                Err(e) => {
                    warn!(%url, error = %e, "snipe: transport error");
                    Disposition::Transport
                }
            };

            // Only retryable dispositions reach this point.
            match session.on_attempt(disposition) {
                NextAction::Done => continue,
                NextAction::Retry { reset_window } => {
                    warn!(
                        %url,
                        ?disposition,
                        attempt = session.attempts(),
                        "snipe: retrying in 60s"
                    );
                    sleep(BACKOFF).await;
                    if reset_window {
                        self.window.reset();
                    }
                }
                NextAction::GiveUp => {
                    anyhow::bail!(
                        "snipe request failed after {} attempts: {} {}",
                        session.attempts(),
                        method,
                        url
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> Disposition {
        classify(Some(StatusCode::from_u16(code).unwrap()))
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(status(200), Disposition::Done);
        assert_eq!(status(201), Disposition::Done);
        // 4xx bodies are the caller's problem, not the retry loop's.
        assert_eq!(status(404), Disposition::Done);
        assert_eq!(status(422), Disposition::Done);
        assert_eq!(status(429), Disposition::Throttled);
        assert_eq!(status(500), Disposition::ServerError);
        assert_eq!(status(503), Disposition::ServerError);
        assert_eq!(classify(None), Disposition::Transport);
    }

    #[test]
    fn three_throttles_then_success_takes_four_attempts() {
        let mut session = RetrySession::new();
        for _ in 0..3 {
            assert_eq!(
                session.on_attempt(Disposition::Throttled),
                NextAction::Retry {
                    reset_window: false
                }
            );
        }
        assert_eq!(session.on_attempt(Disposition::Done), NextAction::Done);
        assert_eq!(session.attempts(), 4);
    }

    #[test]
    fn gives_up_after_budget_without_panicking() {
        let mut session = RetrySession::new();
        for _ in 0..(MAX_ATTEMPTS - 1) {
            assert!(matches!(
                session.on_attempt(Disposition::Transport),
                NextAction::Retry { .. }
            ));
        }
        assert_eq!(session.on_attempt(Disposition::Transport), NextAction::GiveUp);
        assert_eq!(session.attempts(), MAX_ATTEMPTS);
    }

    #[test]
    fn server_errors_reset_the_window() {
        let mut session = RetrySession::new();
        assert_eq!(
            session.on_attempt(Disposition::ServerError),
            NextAction::Retry { reset_window: true }
        );
        assert_eq!(
            session.on_attempt(Disposition::Throttled),
            NextAction::Retry {
                reset_window: false
            }
        );
    }

    #[test]
    fn window_counts_every_attempt() {
        let mut window = RateWindow::new(3);
        assert!(!window.is_full());
        for _ in 0..3 {
            window.record();
        }
        assert!(window.is_full());
        window.reset();
        assert_eq!(window.count(), 0);
        assert!(!window.is_full());
    }
}
