use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::{ModelId, TestVerdict, ValidateVerdict};
use crate::probe::AccountProbe;

/// Identifiers with a call in flight, counted so overlapping calls for the
/// same account keep the flag until the last one ends.
#[derive(Debug, Default)]
struct InFlight(Mutex<HashMap<String, usize>>);

impl InFlight {
    fn enter(&self, identifier: &str) -> InFlightGuard<'_> {
        let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *map.entry(identifier.to_string()).or_default() += 1;
        InFlightGuard {
            set: self,
            identifier: identifier.to_string(),
        }
    }

    fn contains(&self, identifier: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }
}

struct InFlightGuard<'a> {
    set: &'a InFlight,
    identifier: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.set.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = map.get_mut(&self.identifier) {
            *n -= 1;
            if *n == 0 {
                map.remove(&self.identifier);
            }
        }
    }
}

/// One-shot test/validate calls that never fail outward.
///
/// Any error from the probe (transport, non-2xx, bad envelope) becomes a
/// negative verdict carrying the error's message, so a caller looping over
/// many accounts never has to handle `Err`. While a call runs, its account is
/// reported by [`is_testing`](Self::is_testing) or
/// [`is_validating`](Self::is_validating); clones share these flags.
#[derive(Clone)]
pub struct SingleItemTester {
    probe: Arc<dyn AccountProbe>,
    testing: Arc<InFlight>,
    validating: Arc<InFlight>,
}

impl SingleItemTester {
    pub fn new(probe: Arc<dyn AccountProbe>) -> Self {
        Self {
            probe,
            testing: Arc::default(),
            validating: Arc::default(),
        }
    }

    pub fn is_testing(&self, identifier: &str) -> bool {
        self.testing.contains(identifier)
    }

    pub fn is_validating(&self, identifier: &str) -> bool {
        self.validating.contains(identifier)
    }

    pub async fn test(
        &self,
        identifier: &str,
        model: Option<ModelId>,
        message: Option<&str>,
    ) -> TestVerdict {
        let _flag = self.testing.enter(identifier);
        match self.probe.test_account(identifier, model, message).await {
            Ok(resp) => TestVerdict {
                success: resp.success,
                message: resp.message,
                elapsed_ms: resp.response_time,
            },
            Err(e) => TestVerdict {
                success: false,
                message: e.to_string(),
                elapsed_ms: None,
            },
        }
    }

    pub async fn validate(&self, identifier: &str) -> ValidateVerdict {
        let _flag = self.validating.enter(identifier);
        match self.probe.validate_account(identifier).await {
            Ok(resp) => ValidateVerdict {
                valid: resp.valid,
                message: resp.message,
            },
            Err(e) => ValidateVerdict {
                valid: false,
                message: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AdminClient;
    use crate::error::{ConsoleError, CoreResult};
    use crate::probe::{TestResponse, ValidateResponse};
    use async_trait::async_trait;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use tokio::sync::Notify;

    fn admin_tester(base: &str) -> SingleItemTester {
        SingleItemTester::new(Arc::new(AdminClient::new_for_tests(base)))
    }

    #[tokio::test]
    async fn success_verdict_carries_response_time() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/admin/accounts/test");
            then.status(200)
                .json_body(json!({"success": true, "message": "ok", "response_time": 88}));
        });
        let tester = admin_tester(&server.base_url());
        let v = tester.test("a@example.com", Some(ModelId::Chat), Some("hi")).await;
        assert_eq!(
            v,
            TestVerdict {
                success: true,
                message: "ok".into(),
                elapsed_ms: Some(88)
            }
        );
    }

    #[tokio::test]
    async fn non_2xx_becomes_negative_verdict() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/admin/accounts/test");
            then.status(404)
                .json_body(json!({"success": false, "message": "account not found"}));
        });
        let tester = admin_tester(&server.base_url());
        let v = tester.test("ghost@example.com", None, None).await;
        assert!(!v.success);
        assert_eq!(v.message, "account not found");
        assert_eq!(v.elapsed_ms, None);
    }

    #[tokio::test]
    async fn transport_failure_becomes_negative_verdict() {
        let tester = admin_tester("http://127.0.0.1:9");
        let t = tester.test("a@example.com", None, None).await;
        assert!(!t.success);
        assert!(t.message.starts_with("transport failure"));

        let v = tester.validate("a@example.com").await;
        assert!(!v.valid);
        assert!(v.message.starts_with("transport failure"));
    }

    /// Holds every call until the gate opens, then fails with a transport error.
    struct GatedProbe {
        gate: Notify,
    }

    #[async_trait]
    impl AccountProbe for GatedProbe {
        async fn test_account(
            &self,
            _identifier: &str,
            _model: Option<ModelId>,
            _message: Option<&str>,
        ) -> CoreResult<TestResponse> {
            self.gate.notified().await;
            Err(ConsoleError::Transport("connection reset".into()))
        }

        async fn validate_account(&self, _identifier: &str) -> CoreResult<ValidateResponse> {
            self.gate.notified().await;
            Ok(ValidateResponse {
                valid: true,
                message: "valid".into(),
            })
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        while !check() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn in_flight_flags_follow_each_call() {
        let probe = Arc::new(GatedProbe {
            gate: Notify::new(),
        });
        let tester = SingleItemTester::new(probe.clone());

        let pending = tokio::spawn({
            let tester = tester.clone();
            async move { tester.test("a@example.com", None, None).await }
        });
        wait_until(|| tester.is_testing("a@example.com")).await;
        assert!(!tester.is_validating("a@example.com"));
        assert!(!tester.is_testing("b@example.com"));

        probe.gate.notify_one();
        let verdict = pending.await.unwrap();
        assert!(!verdict.success);
        assert!(!tester.is_testing("a@example.com"));

        let pending = tokio::spawn({
            let tester = tester.clone();
            async move { tester.validate("a@example.com").await }
        });
        wait_until(|| tester.is_validating("a@example.com")).await;
        assert!(!tester.is_testing("a@example.com"));

        probe.gate.notify_one();
        assert!(pending.await.unwrap().valid);
        assert!(!tester.is_validating("a@example.com"));
    }

    #[tokio::test]
    async fn dropped_call_clears_its_flag() {
        let tester = SingleItemTester::new(Arc::new(GatedProbe {
            gate: Notify::new(),
        }));
        let pending = tokio::spawn({
            let tester = tester.clone();
            async move { tester.test("a@example.com", None, None).await }
        });
        wait_until(|| tester.is_testing("a@example.com")).await;
        pending.abort();
        let _ = pending.await;
        assert!(!tester.is_testing("a@example.com"));
    }
}
