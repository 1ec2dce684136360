use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::IngestError;

pub type FormParams = BTreeMap<String, String>;

pub fn parse_form(body: &str) -> Result<FormParams, IngestError> {
    serde_urlencoded::from_str::<FormParams>(body)
        .map_err(|err| IngestError::Validation(format!("malformed form body: {err}")))
}

fn required<'a>(params: &'a FormParams, key: &str) -> Result<&'a str, IngestError> {
    params
        .get(key)
        .map(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| IngestError::Validation(format!("missing field {key}")))
}

/// One inbound SMS notification, validated at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSmsEvent {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub num_media: i64,
}

impl InboundSmsEvent {
    pub fn from_form(params: &FormParams) -> Result<Self, IngestError> {
        Ok(Self {
            message_sid: required(params, "MessageSid")?.to_string(),
            from: required(params, "From")?.to_string(),
            to: required(params, "To")?.to_string(),
            body: params.get("Body").filter(|b| !b.is_empty()).cloned(),
            num_media: params
                .get("NumMedia")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0),
        })
    }
}

/// One inbound voice call notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundVoiceEvent {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    pub caller_name: Option<String>,
}

impl InboundVoiceEvent {
    pub fn from_form(params: &FormParams) -> Result<Self, IngestError> {
        Ok(Self {
            call_sid: required(params, "CallSid")?.to_string(),
            from: required(params, "From")?.to_string(),
            to: required(params, "To")?.to_string(),
            caller_name: params.get("CallerName").filter(|v| !v.is_empty()).cloned(),
        })
    }
}

/// A call status callback. `status` stays a raw string here; the state
/// machine owns parsing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCallbackEvent {
    pub call_sid: String,
    pub status: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub duration_secs: Option<i64>,
    pub recording_url: Option<String>,
}

impl StatusCallbackEvent {
    pub fn from_form(params: &FormParams) -> Result<Self, IngestError> {
        Ok(Self {
            call_sid: required(params, "CallSid")?.to_string(),
            status: required(params, "CallStatus")?.to_string(),
            from: params.get("From").filter(|v| !v.is_empty()).cloned(),
            to: params.get("To").filter(|v| !v.is_empty()).cloned(),
            duration_secs: params
                .get("CallDuration")
                .and_then(|v| v.parse::<i64>().ok()),
            recording_url: params
                .get("RecordingUrl")
                .filter(|v| !v.is_empty())
                .cloned(),
        })
    }
}

/// An SMS delivery-status callback for a previously sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsStatusEvent {
    pub message_sid: String,
    pub status: String,
}

impl SmsStatusEvent {
    pub fn from_form(params: &FormParams) -> Result<Self, IngestError> {
        Ok(Self {
            message_sid: required(params, "MessageSid")?.to_string(),
            status: required(params, "MessageStatus")?.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Voice => "voice",
        }
    }
}
