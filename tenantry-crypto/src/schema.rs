//! Integration schemas
//!
//! Each integration type declares its fields, which of them are secret and
//! required, and how its secrets are laid out at rest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use tenantry_core::CryptoError;

/// How encrypted fields of an integration are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigShape {
    /// Every secret field carries its own `{field}IV` / `{field}AuthTag` siblings.
    Inline,
    /// All secret fields are sealed together under one IV/tag pair held in a
    /// sibling metadata object.
    SharedEnvelope,
}

/// One declared field of an integration configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub secret: bool,
    pub required: bool,
}

const fn secret(name: &'static str, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        secret: true,
        required,
    }
}

const fn plain(name: &'static str, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        secret: false,
        required,
    }
}

/// Declared layout of one integration type.
#[derive(Debug, PartialEq, Eq)]
pub struct IntegrationSchema {
    pub integration_type: IntegrationType,
    pub shape: ConfigShape,
    pub fields: &'static [FieldSpec],
}

impl IntegrationSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.secret)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }
}

static TWILIO: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::Twilio,
    shape: ConfigShape::Inline,
    fields: &[
        plain("accountSid", true),
        secret("authToken", true),
        plain("phoneNumber", false),
    ],
};

static ELEVEN_LABS: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::ElevenLabs,
    shape: ConfigShape::Inline,
    fields: &[secret("apiKey", true), plain("voiceId", false)],
};

static OPENAI: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::OpenAi,
    shape: ConfigShape::Inline,
    fields: &[secret("apiKey", true), plain("organization", false)],
};

static WEBHOOK: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::Webhook,
    shape: ConfigShape::Inline,
    fields: &[plain("url", true), secret("signingSecret", false)],
};

static HUBSPOT: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::HubSpot,
    shape: ConfigShape::SharedEnvelope,
    fields: &[
        secret("accessToken", true),
        secret("refreshToken", true),
        plain("portalId", false),
    ],
};

static GOOGLE_CALENDAR: IntegrationSchema = IntegrationSchema {
    integration_type: IntegrationType::GoogleCalendar,
    shape: ConfigShape::SharedEnvelope,
    fields: &[
        plain("clientId", true),
        secret("clientSecret", true),
        secret("refreshToken", true),
        plain("calendarId", false),
    ],
};

/// Supported third-party integration types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    Twilio,
    ElevenLabs,
    #[serde(rename = "openai")]
    OpenAi,
    Webhook,
    #[serde(rename = "hubspot")]
    HubSpot,
    GoogleCalendar,
}

impl IntegrationType {
    pub const ALL: [IntegrationType; 6] = [
        IntegrationType::Twilio,
        IntegrationType::ElevenLabs,
        IntegrationType::OpenAi,
        IntegrationType::Webhook,
        IntegrationType::HubSpot,
        IntegrationType::GoogleCalendar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Twilio => "twilio",
            IntegrationType::ElevenLabs => "eleven_labs",
            IntegrationType::OpenAi => "openai",
            IntegrationType::Webhook => "webhook",
            IntegrationType::HubSpot => "hubspot",
            IntegrationType::GoogleCalendar => "google_calendar",
        }
    }

    pub fn schema(&self) -> &'static IntegrationSchema {
        match self {
            IntegrationType::Twilio => &TWILIO,
            IntegrationType::ElevenLabs => &ELEVEN_LABS,
            IntegrationType::OpenAi => &OPENAI,
            IntegrationType::Webhook => &WEBHOOK,
            IntegrationType::HubSpot => &HUBSPOT,
            IntegrationType::GoogleCalendar => &GOOGLE_CALENDAR,
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntegrationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CryptoError::UnknownIntegration {
                integration_type: s.to_string(),
            })
    }
}

/// Whether any field of the schema is stored encrypted.
pub fn requires_encryption(schema: &IntegrationSchema) -> bool {
    schema.fields.iter().any(|f| f.secret)
}

/// Names of the schema's secret fields, in declaration order.
pub fn encryptable_fields(schema: &IntegrationSchema) -> Vec<&'static str> {
    schema
        .fields
        .iter()
        .filter(|f| f.secret)
        .map(|f| f.name)
        .collect()
}
