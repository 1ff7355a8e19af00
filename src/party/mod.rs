//! Party lookup data model
//!
//! Wire types exchanged with the switch (party, error information, channel
//! transaction request) and the internal correlation types built on them.

pub mod headers;

pub use headers::{ProtocolHeaders, TraceContext};

use crate::error::{LookupError, LookupResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Party identifier types defined by the switch protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyIdType {
    Msisdn,
    Email,
    PersonalId,
    Business,
    Device,
    AccountId,
    Iban,
    Alias,
}

impl PartyIdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyIdType::Msisdn => "MSISDN",
            PartyIdType::Email => "EMAIL",
            PartyIdType::PersonalId => "PERSONAL_ID",
            PartyIdType::Business => "BUSINESS",
            PartyIdType::Device => "DEVICE",
            PartyIdType::AccountId => "ACCOUNT_ID",
            PartyIdType::Iban => "IBAN",
            PartyIdType::Alias => "ALIAS",
        }
    }
}

impl fmt::Display for PartyIdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartyIdType {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MSISDN" => Ok(PartyIdType::Msisdn),
            "EMAIL" => Ok(PartyIdType::Email),
            "PERSONAL_ID" => Ok(PartyIdType::PersonalId),
            "BUSINESS" => Ok(PartyIdType::Business),
            "DEVICE" => Ok(PartyIdType::Device),
            "ACCOUNT_ID" => Ok(PartyIdType::AccountId),
            "IBAN" => Ok(PartyIdType::Iban),
            "ALIAS" => Ok(PartyIdType::Alias),
            other => Err(LookupError::MalformedRequest(format!(
                "unknown party id type: {}",
                other
            ))),
        }
    }
}

/// Names a party lookup target; the only correlation key on the callback path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyIdentifier {
    pub id_type: PartyIdType,
    pub id_value: String,
}

impl PartyIdentifier {
    pub fn new(id_type: PartyIdType, id_value: impl Into<String>) -> Self {
        Self {
            id_type,
            id_value: id_value.into(),
        }
    }

    /// Build an identifier from raw path segments
    pub fn parse(id_type: &str, id_value: &str) -> LookupResult<Self> {
        if id_value.trim().is_empty() {
            return Err(LookupError::MalformedRequest(
                "party identifier value is empty".to_string(),
            ));
        }
        Ok(Self::new(id_type.parse()?, id_value))
    }
}

impl fmt::Display for PartyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id_type, self.id_value)
    }
}

/// `partyIdInfo` block of a party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyIdInfo {
    pub party_id_type: PartyIdType,
    pub party_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_sub_id_or_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsp_id: Option<String>,
}

impl PartyIdInfo {
    pub fn identifier(&self) -> PartyIdentifier {
        PartyIdentifier::new(self.party_id_type, self.party_identifier.clone())
    }
}

/// Resolved party as returned by the payee participant.
///
/// Everything besides `partyIdInfo` and `name` is participant specific and kept
/// as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyDetails {
    pub party_id_info: PartyIdInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl PartyDetails {
    pub fn identifier(&self) -> PartyIdentifier {
        self.party_id_info.identifier()
    }
}

/// Protocol error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    pub error_code: String,
    pub error_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_list: Option<serde_json::Value>,
}

impl ErrorInformation {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error_code: code.into(),
            error_description: description.into(),
            extension_list: None,
        }
    }
}

/// Success envelope: `PUT /parties/{type}/{value}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySwitchResponse {
    pub party: PartyDetails,
}

/// Error envelope: `PUT /parties/{type}/{value}/error`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformationResponse {
    pub error_information: ErrorInformation,
}

/// Result of a party lookup as reported by the callback
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Success { party: PartyDetails },
    Failure { error: ErrorInformation },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Failure,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Failure => "failure",
        }
    }
}

impl LookupOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            LookupOutcome::Success { .. } => OutcomeKind::Success,
            LookupOutcome::Failure { .. } => OutcomeKind::Failure,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind() == OutcomeKind::Failure
    }
}

/// Transaction metadata cached under a party identifier while a lookup is in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub transaction_id: String,
    pub tenant_id: String,
    pub source_participant_id: String,
    pub created_at: DateTime<Utc>,
}

impl TransactionContext {
    pub fn new(
        transaction_id: impl Into<String>,
        tenant_id: impl Into<String>,
        source_participant_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            tenant_id: tenant_id.into(),
            source_participant_id: source_participant_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Payer or payee as carried by a channel transaction request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelParty {
    #[serde(default)]
    pub party_id_info: Option<PartyIdInfo>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Transaction request submitted by the payer's channel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionChannelRequest {
    #[serde(default)]
    pub payer: Option<ChannelParty>,
    #[serde(default)]
    pub payee: Option<ChannelParty>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransactionChannelRequest {
    pub fn payee_identifier(&self) -> LookupResult<PartyIdentifier> {
        Self::party_identifier(self.payee.as_ref(), "payee")
    }

    pub fn payer_identifier(&self) -> LookupResult<PartyIdentifier> {
        Self::party_identifier(self.payer.as_ref(), "payer")
    }

    fn party_identifier(party: Option<&ChannelParty>, role: &str) -> LookupResult<PartyIdentifier> {
        let info = party
            .and_then(|p| p.party_id_info.as_ref())
            .ok_or_else(|| {
                LookupError::MalformedRequest(format!("{} partyIdInfo is missing", role))
            })?;
        if info.party_identifier.trim().is_empty() {
            return Err(LookupError::MalformedRequest(format!(
                "{} partyIdentifier is empty",
                role
            )));
        }
        Ok(info.identifier())
    }
}
