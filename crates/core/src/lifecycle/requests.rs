//! Caller-facing inputs for ticket mutations.
//!
//! Timestamps and statuses arrive as raw strings and are parsed by the
//! lifecycle manager, so that a bad value becomes a validation error
//! rather than a body decoding failure.

use serde::{Deserialize, Deserializer};

/// Body for creating a ticket.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub invoice_id: Option<String>,
    pub client_name: Option<String>,
    pub scheduled_at: Option<String>,
    pub description: Option<String>,
    /// Defaults to `pending`.
    pub status: Option<String>,
    pub dispatcher_id: Option<i64>,
    pub supervisor_id: Option<i64>,
    pub notes: Option<String>,
    /// Only valid, and then required, when `status` is `cancelled`.
    pub cancellation_reason: Option<String>,
}

/// Partial update of a ticket.
///
/// Plain `Option` fields are left unchanged when absent. Nullable fields use
/// a double option: absent keeps the value, `null` clears it.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    pub invoice_id: Option<String>,
    pub client_name: Option<String>,
    pub scheduled_at: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub dispatcher_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub supervisor_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub cancellation_reason: Option<Option<String>>,
}

impl TicketPatch {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }
}

/// Body for a status change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(default)]
    pub status: String,
    pub cancellation_reason: Option<String>,
    /// New entry note, typically sent when returning a ticket to pending.
    pub description: Option<String>,
}

impl StatusPayload {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.cancellation_reason = Some(reason.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Maps a present field (even `null`) to `Some`, so absence and `null`
/// stay distinguishable.
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}
