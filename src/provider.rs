use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::TelephonyConfig;

#[derive(Debug, Clone)]
pub struct TelephonyCredentials {
    pub account_sid: String,
    pub auth_token: String,
}

/// Single seam for credential retrieval. All call sites go through this
/// trait instead of reading secrets ad hoc; the core never persists them.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn telephony(&self) -> Result<TelephonyCredentials>;
}

/// Config-backed credentials (env/file supplied, already in the clear).
#[derive(Clone)]
pub struct ConfigCredentials {
    account_sid: Option<String>,
    auth_token: Option<String>,
}

impl ConfigCredentials {
    pub fn new(cfg: &TelephonyConfig) -> Self {
        Self {
            account_sid: cfg.account_sid.clone(),
            auth_token: cfg.auth_token.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentials {
    async fn telephony(&self) -> Result<TelephonyCredentials> {
        Ok(TelephonyCredentials {
            account_sid: self
                .account_sid
                .clone()
                .ok_or_else(|| anyhow::anyhow!("telephony account_sid not configured"))?,
            auth_token: self
                .auth_token
                .clone()
                .ok_or_else(|| anyhow::anyhow!("telephony auth_token not configured"))?,
        })
    }
}

/// REST client for the telephony provider. Every request carries a bounded
/// timeout; a timed-out send is a failed send, retry policy belongs to the
/// caller.
#[derive(Clone)]
pub struct ProviderClient {
    http: Client,
    api_base_url: String,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(http: Client, cfg: &TelephonyConfig) -> Self {
        Self {
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(cfg.request_timeout_seconds),
        }
    }

    /// Sends one SMS and returns the provider message sid.
    pub async fn send_sms(
        &self,
        creds: &TelephonyCredentials,
        from: &str,
        to: &str,
        body: &str,
        status_callback: Option<&str>,
    ) -> Result<String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url, creds.account_sid
        );
        let mut form = vec![
            ("From", from.to_string()),
            ("To", to.to_string()),
            ("Body", body.to_string()),
        ];
        if let Some(callback) = status_callback {
            form.push(("StatusCallback", callback.to_string()));
        }

        let resp = self
            .http
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;
        Self::extract_sid(resp, "message").await
    }

    /// Creates one outbound call and returns the provider call sid.
    pub async fn create_call(
        &self,
        creds: &TelephonyCredentials,
        from: &str,
        to: &str,
        status_callback: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base_url, creds.account_sid
        );
        let form = vec![
            ("From", from.to_string()),
            ("To", to.to_string()),
            ("StatusCallback", status_callback.to_string()),
        ];

        let resp = self
            .http
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;
        Self::extract_sid(resp, "call").await
    }

    async fn extract_sid(resp: reqwest::Response, what: &str) -> Result<String> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("provider {what} create failed: {status} {body}"));
        }
        let value: Value = resp.json().await?;
        value
            .get("sid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("provider response missing sid"))
    }
}
