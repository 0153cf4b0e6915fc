//! Retry and key-rotation orchestration
//!
//! One `extract` call runs up to one round per key. A round makes up to
//! `MAX_ATTEMPTS` backend calls with the same key:
//!
//! - parseable JSON → normalize, credit the key, return immediately
//! - unparseable reply or transient error → wait `RETRY_DELAY`, try again
//! - rate-limit error → abandon the round, pause `ROTATION_PAUSE`, next key
//!
//! The outcome of the final round decides the error: a parse failure reports
//! the last reply, a transient error its message, a rate limit exhaustion.

use std::sync::Arc;
use std::time::Duration;

use backend::GenerationBackend;
use common::Secret;
use key_pool::{KeyPool, KeyStats};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExtractError, Result};
use crate::insurer::{InsurerProfile, InsurerRegistry};
use crate::normalize::normalize_with;
use crate::prompt::build_prompt;
use crate::schema::StructuredRecord;

/// Attempts per key before moving on.
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait between attempts on the same key.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wait before switching keys after a rate limit.
pub const ROTATION_PAUSE: Duration = Duration::from_secs(1);

/// Shortest document text worth sending (after trimming).
pub const MIN_TEXT_CHARS: usize = 50;

/// Length of the raw-reply excerpt attached to parse failures.
pub const EXCERPT_CHARS: usize = 500;

/// Document text plus the document-type label that selects the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    text: String,
    document_type: String,
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>, document_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_type: document_type.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn document_type(&self) -> &str {
        &self.document_type
    }
}

/// How the orchestrator authenticates backend calls.
#[derive(Debug)]
pub enum Credentials {
    /// Rotate through a pool, one round per key
    Pool(KeyPool),
    /// One bound key, a single round, no rate-limit rotation
    Single(Secret<String>),
}

impl Credentials {
    fn mode(&self) -> &'static str {
        match self {
            Credentials::Pool(_) => "rotating",
            Credentials::Single(_) => "single",
        }
    }
}

/// Key used for one round.
struct RoundKey {
    label: String,
    key: Secret<String>,
    pooled: bool,
}

/// How a round ended when it did not produce a record.
enum RoundFailure {
    RateLimited(String),
    Malformed { excerpt: String },
    Failed(String),
}

enum RoundOutcome {
    Success(StructuredRecord),
    Abandoned(RoundFailure),
}

/// Drives extraction attempts against a generation backend.
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    credentials: Mutex<Credentials>,
    registry: InsurerRegistry,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        credentials: Credentials,
        registry: InsurerRegistry,
    ) -> Self {
        info!(
            backend = backend.id(),
            model = backend.model(),
            mode = credentials.mode(),
            insurers = registry.len(),
            "orchestrator initialized"
        );
        Self {
            backend,
            credentials: Mutex::new(credentials),
            registry,
        }
    }

    pub fn registry(&self) -> &InsurerRegistry {
        &self.registry
    }

    /// "rotating" or "single".
    pub async fn mode(&self) -> &'static str {
        self.credentials.lock().await.mode()
    }

    /// Replace the credentials used by subsequent calls.
    pub async fn configure(&self, credentials: Credentials) {
        let mut current = self.credentials.lock().await;
        info!(mode = credentials.mode(), "credentials reconfigured");
        *current = credentials;
    }

    /// Per-key usage counters; empty in single-key mode.
    pub async fn key_stats(&self) -> Vec<KeyStats> {
        match &*self.credentials.lock().await {
            Credentials::Pool(pool) => pool.stats(),
            Credentials::Single(_) => Vec::new(),
        }
    }

    /// Extract a structured record from one document.
    #[instrument(skip_all, fields(document_type = %request.document_type()))]
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<StructuredRecord> {
        let text = request.text().trim();
        let len = text.chars().count();
        if len < MIN_TEXT_CHARS {
            warn!(len, "document text too short, not calling backend");
            return Err(ExtractError::insufficient(len));
        }

        let profile = self
            .registry
            .get(request.document_type())
            .ok_or_else(|| ExtractError::UnknownDocumentType(request.document_type().to_string()))?;
        let prompt = build_prompt(text, profile);

        let rounds = match &*self.credentials.lock().await {
            Credentials::Pool(pool) => pool.len(),
            Credentials::Single(_) => 1,
        };
        if rounds == 0 {
            warn!("key pool is empty, not calling backend");
            return Err(ExtractError::NoCredentials);
        }

        let mut attempts = 0u32;
        let mut last_failure = None;

        for round in 1..=rounds {
            let key = self.round_key().await?;
            info!(round, rounds, key = %key.label, "starting extraction round");

            match self.run_round(&key, &prompt, profile, &mut attempts).await {
                RoundOutcome::Success(record) => {
                    info!(round, attempts, key = %key.label, "extraction succeeded");
                    return Ok(record);
                }
                RoundOutcome::Abandoned(failure) => {
                    let rate_limited = matches!(failure, RoundFailure::RateLimited(_));
                    last_failure = Some(failure);
                    if round < rounds {
                        metrics::counter!("extraction_key_rotations_total").increment(1);
                        if rate_limited {
                            tokio::time::sleep(ROTATION_PAUSE).await;
                        }
                        warn!(round, key = %key.label, "abandoning key, rotating to next");
                    }
                }
            }
        }

        Err(match last_failure {
            Some(RoundFailure::Malformed { excerpt }) => {
                ExtractError::MalformedResponse { attempts, excerpt }
            }
            Some(RoundFailure::Failed(message)) => ExtractError::Backend { attempts, message },
            Some(RoundFailure::RateLimited(_)) | None => ExtractError::Exhausted { rounds },
        })
    }

    async fn round_key(&self) -> Result<RoundKey> {
        match &mut *self.credentials.lock().await {
            Credentials::Pool(pool) => {
                let selected = pool.next().ok_or(ExtractError::NoCredentials)?;
                Ok(RoundKey {
                    label: selected.label(),
                    key: selected.key,
                    pooled: true,
                })
            }
            Credentials::Single(key) => Ok(RoundKey {
                label: "single".to_string(),
                key: key.clone(),
                pooled: false,
            }),
        }
    }

    async fn run_round(
        &self,
        key: &RoundKey,
        prompt: &str,
        profile: &InsurerProfile,
        attempts: &mut u32,
    ) -> RoundOutcome {
        let mut failure = RoundFailure::Failed(String::from("no attempt made"));

        for attempt in 1..=MAX_ATTEMPTS {
            *attempts += 1;
            debug!(attempt, key = %key.label, "calling backend");

            match self.backend.generate(key.key.expose(), prompt).await {
                Ok(reply) => match parse_payload(&reply) {
                    Some(raw) => {
                        metrics::counter!("extraction_attempts_total", "outcome" => "success")
                            .increment(1);
                        let record = normalize_with(raw, Some(profile));
                        if key.pooled
                            && let Credentials::Pool(pool) = &mut *self.credentials.lock().await
                        {
                            pool.mark_success(key.key.expose());
                        }
                        return RoundOutcome::Success(record);
                    }
                    None => {
                        metrics::counter!("extraction_attempts_total", "outcome" => "malformed")
                            .increment(1);
                        warn!(attempt, key = %key.label, "reply contained no parseable JSON object");
                        failure = RoundFailure::Malformed {
                            excerpt: excerpt(&reply),
                        };
                    }
                },
                Err(e) => {
                    let message = e.to_string();
                    if self.mark_failed(key, &message).await {
                        metrics::counter!("extraction_attempts_total", "outcome" => "rate_limited")
                            .increment(1);
                        warn!(attempt, key = %key.label, error = %message, "key rate limited");
                        return RoundOutcome::Abandoned(RoundFailure::RateLimited(message));
                    }
                    metrics::counter!("extraction_attempts_total", "outcome" => "error")
                        .increment(1);
                    warn!(attempt, key = %key.label, error = %message, "backend call failed");
                    failure = RoundFailure::Failed(message);
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        RoundOutcome::Abandoned(failure)
    }

    /// Ask the pool to classify a failure. Single-key mode has no pool, so
    /// every failure is retried as transient.
    async fn mark_failed(&self, key: &RoundKey, message: &str) -> bool {
        if !key.pooled {
            return false;
        }
        match &mut *self.credentials.lock().await {
            Credentials::Pool(pool) => pool.mark_failed(key.key.expose(), message),
            Credentials::Single(_) => false,
        }
    }
}

/// Parse the substring from the first `{` to the last `}` as a JSON object.
pub fn parse_payload(reply: &str) -> Option<Map<String, Value>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

fn excerpt(reply: &str) -> String {
    reply.trim().chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::BackendError;
    use std::future::Future;
    use std::pin::Pin;

    type Reply = Box<dyn Fn(&str, usize) -> backend::Result<String> + Send + Sync>;

    /// Backend stub: records the key of every call and answers through a
    /// closure receiving the key and the 0-based call index.
    struct StubBackend {
        calls: std::sync::Mutex<Vec<String>>,
        reply: Reply,
    }

    impl StubBackend {
        fn new(reply: impl Fn(&str, usize) -> backend::Result<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: std::sync::Mutex::new(Vec::new()),
                reply: Box::new(reply),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GenerationBackend for StubBackend {
        fn id(&self) -> &str {
            "stub"
        }

        fn model(&self) -> &str {
            "stub-model"
        }

        fn generate<'a>(
            &'a self,
            credential: &'a str,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = backend::Result<String>> + Send + 'a>> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(credential.to_string());
                calls.len() - 1
            };
            let result = (self.reply)(credential, index);
            Box::pin(async move { result })
        }
    }

    const VALID_REPLY: &str = r#"Here you go:
```json
{"POLICY_NO": "R-2024-001", "CUSTOMER_NAME": "  Asha   Verma ", "NCB": "n/a"}
```"#;

    fn rate_limit() -> BackendError {
        BackendError::Status {
            status: 429,
            body: r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.into(),
        }
    }

    fn document() -> ExtractionRequest {
        ExtractionRequest::new(
            "RELIANCE GENERAL INSURANCE Policy Number R-2024-001 Insured Name Asha Verma \
             Registration No MH12AB1234",
            "reliance",
        )
    }

    fn pooled(backend: Arc<StubBackend>, keys: &[&str]) -> Orchestrator {
        Orchestrator::new(
            backend,
            Credentials::Pool(KeyPool::from_keys(keys.iter().copied())),
            InsurerRegistry::builtin(),
        )
    }

    fn single(backend: Arc<StubBackend>) -> Orchestrator {
        Orchestrator::new(
            backend,
            Credentials::Single(Secret::from("only-key")),
            InsurerRegistry::builtin(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn short_text_fails_without_backend_call() {
        let backend = StubBackend::new(|_, _| Ok(VALID_REPLY.into()));
        let orch = pooled(backend.clone(), &["k1"]);

        let err = orch
            .extract(&ExtractionRequest::new("   too short   ", "reliance"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InsufficientInput { len: 9, min: 50 }), "got {err:?}");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_fails_with_no_credentials() {
        let backend = StubBackend::new(|_, _| Ok(VALID_REPLY.into()));
        let orch = pooled(backend.clone(), &[]);

        let err = orch.extract(&document()).await.unwrap_err();
        assert!(matches!(err, ExtractError::NoCredentials), "got {err:?}");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_document_type_fails_without_backend_call() {
        let backend = StubBackend::new(|_, _| Ok(VALID_REPLY.into()));
        let orch = pooled(backend.clone(), &["k1"]);
        let request = ExtractionRequest::new(document().text(), "tata");

        let err = orch.extract(&request).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnknownDocumentType(ref t) if t == "tata"), "got {err:?}");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_returns_normalized_record() {
        let backend = StubBackend::new(|_, _| Ok(VALID_REPLY.into()));
        let orch = pooled(backend.clone(), &["k1", "k2"]);

        let record = orch.extract(&document()).await.unwrap();
        assert_eq!(record.policy_number(), "R-2024-001");
        assert_eq!(record.get_str("CUSTOMER_NAME"), "Asha Verma");
        assert_eq!(record.get_str("NCB"), "");
        assert_eq!(
            record.get_str("INSURANCE_COMPANY_NAME"),
            "Reliance General Insurance"
        );
        assert_eq!(backend.calls(), vec!["k1"]);

        let stats = orch.key_stats().await;
        assert_eq!(stats[0].uses, 1);
        assert_eq!(stats[1].uses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_rotates_to_next_key_without_retrying() {
        let backend = StubBackend::new(|key, _| {
            if key == "k1" {
                Err(rate_limit())
            } else {
                Ok(VALID_REPLY.into())
            }
        });
        let orch = pooled(backend.clone(), &["k1", "k2"]);
        let started = tokio::time::Instant::now();

        let record = orch.extract(&document()).await.unwrap();
        assert_eq!(record.policy_number(), "R-2024-001");
        assert_eq!(backend.calls(), vec!["k1", "k2"], "two rounds, no retries");
        assert_eq!(started.elapsed(), ROTATION_PAUSE);

        let stats = orch.key_stats().await;
        assert_eq!(stats[0].failures, 1);
        assert!(!stats[0].available);
        assert_eq!(stats[1].uses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_text_everywhere_fails_after_all_attempts() {
        let backend = StubBackend::new(|_, _| Ok("I could not find any policy data.".into()));
        let orch = pooled(backend.clone(), &["k1", "k2"]);

        let err = orch.extract(&document()).await.unwrap_err();
        match err {
            ExtractError::MalformedResponse { attempts, excerpt } => {
                assert_eq!(attempts, 6);
                assert_eq!(excerpt, "I could not find any policy data.");
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
        assert_eq!(backend.calls(), vec!["k1", "k1", "k1", "k2", "k2", "k2"]);
        assert!(orch.key_stats().await.iter().all(|s| s.available));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_reply_is_retried_on_same_key() {
        let backend = StubBackend::new(|_, call| {
            if call == 0 {
                Ok("{\"POLICY_NO\": \"R-1\",".into())
            } else {
                Ok(VALID_REPLY.into())
            }
        });
        let orch = pooled(backend.clone(), &["k1", "k2"]);
        let started = tokio::time::Instant::now();

        orch.extract(&document()).await.unwrap();
        assert_eq!(backend.calls(), vec!["k1", "k1"]);
        assert_eq!(started.elapsed(), RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn excerpt_is_truncated() {
        let long = "x".repeat(2000);
        let backend = StubBackend::new(move |_, _| Ok(long.clone()));
        let orch = single(backend);

        match orch.extract(&document()).await.unwrap_err() {
            ExtractError::MalformedResponse { attempts, excerpt } => {
                assert_eq!(attempts, 3);
                assert_eq!(excerpt.chars().count(), EXCERPT_CHARS);
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_round_then_rotate() {
        let backend = StubBackend::new(|key, _| {
            if key == "k1" {
                Err(BackendError::Http("network timeout".into()))
            } else {
                Ok(VALID_REPLY.into())
            }
        });
        let orch = pooled(backend.clone(), &["k1", "k2"]);
        let started = tokio::time::Instant::now();

        orch.extract(&document()).await.unwrap();
        assert_eq!(backend.calls(), vec!["k1", "k1", "k1", "k2"]);
        assert_eq!(started.elapsed(), RETRY_DELAY * 2);
        assert!(orch.key_stats().await[0].available, "transient errors keep the key");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_on_last_key_surface_message() {
        let backend = StubBackend::new(|_, _| {
            Err(BackendError::Status {
                status: 503,
                body: "model overloaded".into(),
            })
        });
        let orch = pooled(backend.clone(), &["k1", "k2"]);

        match orch.extract(&document()).await.unwrap_err() {
            ExtractError::Backend { attempts, message } => {
                assert_eq!(attempts, 6);
                assert!(message.contains("model overloaded"), "got: {message}");
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_keys_rate_limited_is_exhaustion() {
        let backend = StubBackend::new(|_, _| Err(rate_limit()));
        let orch = pooled(backend.clone(), &["k1", "k2", "k3"]);

        let err = orch.extract(&document()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Exhausted { rounds: 3 }), "got {err:?}");
        assert_eq!(backend.calls(), vec!["k1", "k2", "k3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_reset_recycles_keys_across_calls() {
        let backend = StubBackend::new(|_, call| {
            if call < 2 {
                Err(rate_limit())
            } else {
                Ok(VALID_REPLY.into())
            }
        });
        let orch = pooled(backend.clone(), &["k1", "k2"]);

        assert!(orch.extract(&document()).await.is_err());
        orch.extract(&document()).await.unwrap();
        assert_eq!(backend.calls(), vec!["k1", "k2", "k1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_key_mode_treats_rate_limit_as_transient() {
        let backend = StubBackend::new(|_, _| Err(rate_limit()));
        let orch = single(backend.clone());
        let started = tokio::time::Instant::now();

        let err = orch.extract(&document()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Backend { attempts: 3, .. }), "got {err:?}");
        assert_eq!(backend.calls(), vec!["only-key"; 3]);
        assert_eq!(started.elapsed(), RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn configure_replaces_credentials() {
        let backend = StubBackend::new(|_, _| Ok(VALID_REPLY.into()));
        let orch = single(backend.clone());
        assert_eq!(orch.mode().await, "single");
        assert!(orch.key_stats().await.is_empty());

        orch.configure(Credentials::Pool(KeyPool::from_keys(["n1", "n2"])))
            .await;
        assert_eq!(orch.mode().await, "rotating");
        orch.extract(&document()).await.unwrap();
        assert_eq!(backend.calls(), vec!["n1"]);
    }

    #[test]
    fn parse_payload_takes_outermost_braces() {
        let map = parse_payload("noise {\"a\": {\"b\": 1}} trailing").unwrap();
        assert_eq!(map["a"]["b"], 1);
    }

    #[test]
    fn parse_payload_rejects_missing_or_reversed_braces() {
        assert!(parse_payload("no json here").is_none());
        assert!(parse_payload("} backwards {").is_none());
        assert!(parse_payload("{not: valid}").is_none());
    }

    #[test]
    fn parse_payload_rejects_non_objects() {
        assert!(parse_payload("[1, 2]").is_none());
    }
}
