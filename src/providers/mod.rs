//! Vendor adapters behind one uniform contract.
//!
//! Each adapter validates the rendered payload for its channel, maps it to the
//! vendor's wire format and classifies the vendor's answer into
//! `InvalidRequest` (never retried) or `Unavailable` (failover-eligible).
//! Vendor throttling responses are retried a few times inside the adapter
//! before they surface as `Unavailable`.

use async_trait::async_trait;

use crate::{
    error::DispatchError,
    models::{
        delivery::{DeliveryStatus, SendReceipt},
        health::HealthRecord,
        message::RenderedPayload,
        provider::Channel,
    },
};

pub mod fcm;
pub mod http;
pub mod mailgun;
pub mod registry;
pub mod sendgrid;
pub mod twilio;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    async fn send(&self, payload: &RenderedPayload) -> Result<SendReceipt, DispatchError>;

    async fn get_status(&self, message_id: &str) -> Result<DeliveryStatus, DispatchError>;

    /// Lightweight liveness probe. Never fails; problems are reported in the
    /// returned record.
    async fn check_health(&self) -> HealthRecord;
}
