use anyhow::{Result, anyhow};

use crate::models::{message::RenderedPayload, provider::Channel};

const MAX_SMS_BODY_CHARS: usize = 1_600;

pub fn validate_payload(channel: Channel, payload: &RenderedPayload) -> Result<()> {
    if payload.body.trim().is_empty() {
        return Err(anyhow!("Message body cannot be empty"));
    }

    match channel {
        Channel::Email => {
            validate_email_address(&payload.recipient)?;
            if payload.subject.as_deref().is_none_or(|s| s.trim().is_empty()) {
                return Err(anyhow!("Email subject is required"));
            }
            Ok(())
        }
        Channel::Sms => {
            validate_phone_number(&payload.recipient)?;
            if payload.body.chars().count() > MAX_SMS_BODY_CHARS {
                return Err(anyhow!(
                    "SMS body too long (maximum {} characters)",
                    MAX_SMS_BODY_CHARS
                ));
            }
            Ok(())
        }
        Channel::Push => validate_fcm_token(&payload.recipient),
    }
}

pub fn validate_email_address(address: &str) -> Result<()> {
    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| anyhow!("Email address must contain '@'"))?;

    if local.is_empty() || local.len() > 64 {
        return Err(anyhow!("Email local part must be 1-64 characters"));
    }

    if domain.len() < 3 || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return Err(anyhow!("Email domain '{}' is not valid", domain));
    }

    if address.chars().any(|c| c.is_whitespace()) || domain.contains('@') {
        return Err(anyhow!("Email address contains invalid characters"));
    }

    Ok(())
}

/// E.164: leading '+', then 8 to 15 digits with no leading zero.
pub fn validate_phone_number(number: &str) -> Result<()> {
    let digits = number
        .strip_prefix('+')
        .ok_or_else(|| anyhow!("Phone number must be in E.164 format"))?;

    if !(8..=15).contains(&digits.len()) {
        return Err(anyhow!("Phone number must have 8-15 digits"));
    }

    if !digits.chars().all(|c| c.is_ascii_digit()) || digits.starts_with('0') {
        return Err(anyhow!("Phone number contains invalid digits"));
    }

    Ok(())
}

pub fn validate_fcm_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(anyhow!("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(anyhow!("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.');

    if !valid_chars {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}
