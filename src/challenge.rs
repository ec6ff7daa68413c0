//! Proof-of-humanity checks demanded from claimers of busy drops.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

pub const MAX_TOKEN_LEN: usize = 8_192;

#[async_trait]
pub trait HumanityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> bool;
}

/// hCaptcha `siteverify` client.
#[derive(Clone)]
pub struct HCaptchaVerifier {
    verify_url: String,
    secret: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
}

impl HCaptchaVerifier {
    pub fn new(verify_url: &str, secret: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        assert!(!verify_url.is_empty(), "Verify URL must be provided");
        assert!(!secret.is_empty(), "hCaptcha secret must be provided");
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            verify_url: verify_url.to_string(),
            secret: secret.to_string(),
            client,
        })
    }
}

#[async_trait]
impl HumanityVerifier for HCaptchaVerifier {
    async fn verify(&self, token: &str) -> bool {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return false;
        }

        let form = [("response", token), ("secret", self.secret.as_str())];
        let response = match self.client.post(&self.verify_url).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("Captcha verification request failed: {err}");
                return false;
            }
        };

        match response.json::<SiteVerifyResponse>().await {
            Ok(body) => body.success,
            Err(err) => {
                warn!("Captcha verification returned unreadable body: {err}");
                false
            }
        }
    }
}

/// Used when no captcha secret is configured: any non-empty token passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveVerifier;

#[async_trait]
impl HumanityVerifier for PermissiveVerifier {
    async fn verify(&self, token: &str) -> bool {
        !token.trim().is_empty() && token.len() <= MAX_TOKEN_LEN
    }
}
