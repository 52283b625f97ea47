use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::Duration,
};

use anyhow::{Error, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            "push" => Ok(Channel::Push),
            other => Err(anyhow!("Unknown channel '{}'", other)),
        }
    }
}

/// One configured delivery provider. Loaded once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Adapter kind resolved through the provider registry, e.g. `sendgrid`.
    pub kind: String,
    pub channel: Channel,
    /// Lower ranks are tried first.
    pub priority: u32,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Adapter-internal attempts for transient vendor throttling.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Per-window ceiling for this provider, shared by every tenant.
    #[serde(default)]
    pub rate_limit: Option<u64>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Account identifier: Twilio account SID, Mailgun domain or FCM project id.
    #[serde(default)]
    pub account: Option<String>,

    /// Sender address or number.
    #[serde(default)]
    pub sender: Option<String>,
}

impl ProviderConfig {
    pub fn new(name: &str, kind: &str, channel: Channel, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            channel,
            priority,
            weight: default_weight(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            rate_limit: None,
            base_url: None,
            api_key: None,
            account: None,
            sender: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u64) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn require_api_key(&self) -> Result<&str, Error> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Provider '{}' is missing api_key", self.name))
    }

    pub fn require_account(&self) -> Result<&str, Error> {
        self.account
            .as_deref()
            .ok_or_else(|| anyhow!("Provider '{}' is missing account", self.name))
    }

    pub fn require_sender(&self) -> Result<&str, Error> {
        self.sender
            .as_deref()
            .ok_or_else(|| anyhow!("Provider '{}' is missing sender", self.name))
    }
}

fn default_weight() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retry_count() -> u32 {
    2
}

/// Orders providers by priority ascending, ties broken by weight descending.
pub fn sort_by_preference(providers: &mut [ProviderConfig]) {
    providers.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.weight.cmp(&a.weight))
            .then_with(|| a.name.cmp(&b.name))
    });
}
