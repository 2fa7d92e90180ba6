use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{ConsoleError, CoreResult};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{ModelId, PoolSnapshot, QueueSnapshot};
use crate::probe::{
    AccountProbe, QueueSource, TestRequest, TestResponse, ValidateRequest, ValidateResponse,
};

/// Client for the admin-scoped endpoints. Every call carries the admin bearer.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: HttpClient,
    base: String,
    token: SecretString,
}

impl AdminClient {
    pub fn new(http: HttpClient, base: String, token: SecretString) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build from config; the admin token is read from `cfg.admin_token_env`.
    pub fn from_config(cfg: &Config, http: HttpClient) -> CoreResult<Self> {
        let token = cfg.admin_token().ok_or_else(|| {
            ConsoleError::MissingCredential(format!(
                "admin token not set (expected in ${})",
                cfg.admin_token_env
            ))
        })?;
        Ok(Self::new(http, cfg.base().to_string(), SecretString::from(token)))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        AdminClient::new(
            HttpClient::new_default().unwrap(),
            server_base.to_string(),
            SecretString::from("admin-token".to_string()),
        )
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// Current keys and accounts from the external store.
    pub async fn fetch_pool(&self) -> CoreResult<PoolSnapshot> {
        let bearer = self.bearer();
        let ctx = RequestCtx {
            bearer: Some(&bearer),
            ..Default::default()
        };
        let url = format!("{}/admin/config", self.base);
        let (pool, _status) = self.http.get_json::<PoolSnapshot>(&url, &ctx).await?;
        Ok(pool)
    }
}

#[async_trait]
impl AccountProbe for AdminClient {
    async fn test_account(
        &self,
        identifier: &str,
        model: Option<ModelId>,
        message: Option<&str>,
    ) -> CoreResult<TestResponse> {
        let payload = TestRequest {
            identifier,
            model,
            message,
        };
        let bearer = self.bearer();
        let ctx = RequestCtx {
            bearer: Some(&bearer),
            ..Default::default()
        };
        let url = format!("{}/admin/accounts/test", self.base);
        let (mut resp, status) = self
            .http
            .post_json::<_, TestResponse>(&url, &payload, &ctx)
            .await?;
        resp.status_code = Some(status);
        Ok(resp)
    }

    async fn validate_account(&self, identifier: &str) -> CoreResult<ValidateResponse> {
        let bearer = self.bearer();
        let ctx = RequestCtx {
            bearer: Some(&bearer),
            ..Default::default()
        };
        let url = format!("{}/admin/accounts/validate", self.base);
        let (resp, _status) = self
            .http
            .post_json::<_, ValidateResponse>(&url, &ValidateRequest { identifier }, &ctx)
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl QueueSource for AdminClient {
    async fn queue_status(&self) -> CoreResult<QueueSnapshot> {
        let bearer = self.bearer();
        let ctx = RequestCtx {
            bearer: Some(&bearer),
            ..Default::default()
        };
        let url = format!("{}/admin/queue/status", self.base);
        let (snapshot, _status) = self.http.get_json::<QueueSnapshot>(&url, &ctx).await?;
        Ok(snapshot)
    }
}
