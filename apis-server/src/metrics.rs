use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    auth_decisions: IntCounterVec,
    rate_limit_decisions: IntCounterVec,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "apis_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let auth_decisions = IntCounterVec::new(
            Opts::new(
                "apis_auth_decisions_total",
                "Count of authentication stage decisions grouped by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(auth_decisions.clone()))?;

        let rate_limit_decisions = IntCounterVec::new(
            Opts::new(
                "apis_rate_limit_decisions_total",
                "Count of rate limiter decisions grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(rate_limit_decisions.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            auth_decisions,
            rate_limit_decisions,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn auth_decision(&self, kind: &str, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "rejected" };
        self.auth_decisions.with_label_values(&[kind, outcome]).inc();
    }

    pub fn rate_limit_decision(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "limited" };
        self.rate_limit_decisions
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_exposition() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.login_attempt("success");
        metrics.auth_decision("local", false);
        metrics.rate_limit_decision(false);
        let response = metrics.render().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
