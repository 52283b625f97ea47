use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    error::DispatchError,
    models::{
        delivery::{DeliveryStatus, SendReceipt},
        fcm::{FcmMessage, FcmNotification, FcmRequest, FcmResponse},
        health::HealthRecord,
        message::RenderedPayload,
        provider::{Channel, ProviderConfig},
        retry::RetryConfig,
    },
    providers::{
        ProviderAdapter,
        http::{
            VendorError, adapter_retry_config, base_url, below_server_error, build_client,
            call_with_retry, check_payload, probe, read_json,
        },
    },
};

const DEFAULT_BASE_URL: &str = "https://fcm.googleapis.com";
const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push through the FCM HTTP v1 API. `account` is the Firebase project id.
///
/// A configured `api_key` is used as a static bearer token; otherwise tokens
/// come from Google application default credentials.
pub struct FcmAdapter {
    config: ProviderConfig,
    http_client: Client,
    base_url: String,
    project_id: String,
    static_token: Option<String>,
    token_provider: OnceCell<Arc<dyn TokenProvider>>,
    retry_config: RetryConfig,
}

impl FcmAdapter {
    pub fn build(
        config: &ProviderConfig,
        retry: &RetryConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, Error> {
        let adapter = Self {
            http_client: build_client(config)?,
            base_url: base_url(config, DEFAULT_BASE_URL),
            project_id: config.require_account()?.to_string(),
            static_token: config.api_key.clone(),
            token_provider: OnceCell::new(),
            retry_config: adapter_retry_config(config, retry),
            config: config.clone(),
        };

        info!(provider = %config.name, project_id = %adapter.project_id, "FCM adapter initialized");
        Ok(Arc::new(adapter))
    }

    async fn bearer_token(&self) -> Result<String, Error> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let provider = self
            .token_provider
            .get_or_try_init(|| async { gcp_auth::provider().await })
            .await
            .map_err(|e| anyhow!("FCM credentials unavailable: {}", e))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| anyhow!("FCM token request failed: {}", e))?;

        Ok(token.as_str().to_string())
    }

    fn request(&self, payload: &RenderedPayload) -> FcmRequest {
        FcmRequest {
            message: FcmMessage {
                token: payload.recipient.clone(),
                notification: FcmNotification {
                    title: payload.subject.clone().unwrap_or_default(),
                    body: payload.body.clone(),
                },
                data: (!payload.data.is_empty()).then(|| payload.data.clone()),
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for FcmAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, payload: &RenderedPayload) -> Result<SendReceipt, DispatchError> {
        check_payload(&self.config, payload)?;

        let token = self
            .bearer_token()
            .await
            .map_err(|e| DispatchError::unavailable(&self.config.name, e.to_string()))?;

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );
        let request = self.request(payload);
        let (url, request, token) = (&url, &request, &token);

        debug!(provider = %self.config.name, "Sending FCM push notification");

        call_with_retry(&self.config.name, &self.retry_config, || async move {
            let response = self
                .http_client
                .post(url)
                .bearer_auth(token)
                .json(request)
                .send()
                .await?;
            let (_, vendor_response) = read_json(response).await?;

            let parsed: FcmResponse = serde_json::from_value(vendor_response.clone())
                .map_err(|e| VendorError::Failed(format!("Unexpected FCM response: {}", e)))?;
            let message_id = parsed
                .name
                .rsplit('/')
                .next()
                .unwrap_or(parsed.name.as_str())
                .to_string();

            Ok::<_, VendorError>(SendReceipt {
                message_id,
                status: DeliveryStatus::Accepted,
                vendor_response,
            })
        })
        .await
    }

    /// FCM exposes no per-message status; an accepted message stays accepted.
    async fn get_status(&self, _message_id: &str) -> Result<DeliveryStatus, DispatchError> {
        Ok(DeliveryStatus::Accepted)
    }

    async fn check_health(&self) -> HealthRecord {
        let token = match self.bearer_token().await {
            Ok(token) => token,
            Err(e) => return HealthRecord::unhealthy(&self.config.name, 0, e.to_string()),
        };

        let request = self
            .http_client
            .get(format!("{}/v1/projects/{}", self.base_url, self.project_id))
            .bearer_auth(token);

        probe(&self.config.name, request, below_server_error).await
    }
}
