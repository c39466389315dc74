//! Delivery boundary: OS push notifications, email, and the in-app feed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::DeliveryKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    ConflictAlert,
    Reminder,
    Digest,
}

/// What the email renderer receives. Rendering is not our concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailEnvelope {
    pub template: EmailTemplate,
    pub data: Map<String, Value>,
    pub recipients: Vec<String>,
}

impl EmailEnvelope {
    /// Flat `{type, ...data, recipients}` object.
    pub fn to_json(&self) -> Value {
        let mut obj = self.data.clone();
        obj.insert(
            "type".into(),
            serde_json::to_value(self.template).unwrap_or(Value::Null),
        );
        obj.insert(
            "recipients".into(),
            Value::Array(self.recipients.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(obj)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPayload {
    Notification {
        title: String,
        body: String,
        icon: Option<String>,
        tag: Option<String>,
        data: Option<Value>,
    },
    Email(EmailEnvelope),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    PermissionDenied,
    Unavailable(String),
    Rejected(String),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::PermissionDenied => write!(f, "notification permission denied"),
            DeliveryError::Unavailable(e) => write!(f, "delivery channel unavailable: {e}"),
            DeliveryError::Rejected(e) => write!(f, "delivery rejected: {e}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Whether OS-level notifications may be shown. In-app delivery ignores this.
    fn push_permitted(&self) -> bool {
        true
    }

    async fn deliver(&self, kind: DeliveryKind, payload: &DeliveryPayload) -> Result<(), DeliveryError>;
}

/// Writes every delivery to the log. The daemon's default sink.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    pub push_permitted: bool,
}

#[async_trait]
impl DeliverySink for TracingSink {
    fn push_permitted(&self) -> bool {
        self.push_permitted
    }

    async fn deliver(&self, kind: DeliveryKind, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        match payload {
            DeliveryPayload::Notification { title, body, .. } => {
                tracing::info!(kind = kind.as_str(), "{title}: {body}");
            }
            DeliveryPayload::Email(envelope) => {
                tracing::info!(
                    kind = kind.as_str(),
                    recipients = envelope.recipients.len(),
                    "email {}",
                    envelope.to_json()
                );
            }
        }
        Ok(())
    }
}

/// Keeps every delivery in memory. Failing channels can be switched on per kind.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(DeliveryKind, DeliveryPayload)>>,
    failing: Mutex<HashSet<DeliveryKind>>,
    push_denied: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink without OS notification permission.
    pub fn without_push_permission() -> Self {
        Self {
            push_denied: true,
            ..Self::default()
        }
    }

    pub fn fail(&self, kind: DeliveryKind, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(kind);
        } else {
            set.remove(&kind);
        }
    }

    pub fn deliveries(&self) -> Vec<(DeliveryKind, DeliveryPayload)> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, kind: DeliveryKind) -> usize {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn push_permitted(&self) -> bool {
        !self.push_denied
    }

    async fn deliver(&self, kind: DeliveryKind, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
        {
            return Err(DeliveryError::Unavailable(format!("{} channel down", kind.as_str())));
        }
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, payload.clone()));
        Ok(())
    }
}
