//! Core data models for device install records
//!
//! This module defines the parsed form of one input line ([`AppsInstalled`]),
//! the line-level parse errors, and the binary payload ([`UserApps`]) written
//! to the store.
//!
//! # Line format
//!
//! ```text
//! deviceType \t deviceId \t latitude \t longitude \t app1,app2,...
//! ```
//!
//! Fields past the fifth are ignored.

use crate::Result;
use crate::constants::{APP_ID_DELIMITER, FIELD_DELIMITER, MIN_LINE_FIELDS};
use serde::{Deserialize, Serialize};

/// One parsed device install record
///
/// A record only exists once every field of its source line parsed, so a
/// partially-parsed record is never observable outside [`AppsInstalled::parse_with_policy`].
#[derive(Debug, Clone, PartialEq)]
pub struct AppsInstalled {
    /// Device type, used to route the record to its category writer
    pub dev_type: String,
    /// Device identifier, the second half of the store key
    pub dev_id: String,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Installed application ids, in input order
    pub apps: Vec<u32>,
}

/// Treatment of app-id tokens that are not integers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AppIdPolicy {
    /// Replace unparsable tokens with 0 (legacy behaviour)
    #[default]
    Coerce,
    /// Drop unparsable tokens
    Skip,
    /// Fail the whole line
    Reject,
}

/// Reasons a line cannot become a record
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected at least 5 tab-separated fields, found {fields}")]
    MalformedLine { fields: usize },

    #[error("invalid {field} '{value}'")]
    InvalidCoordinate { field: &'static str, value: String },

    #[error("invalid app id '{token}'")]
    InvalidAppId { token: String },
}

impl AppsInstalled {
    /// Parse a line with the legacy app-id coercion
    pub fn parse(line: &str) -> std::result::Result<Self, ParseError> {
        Self::parse_with_policy(line, AppIdPolicy::Coerce)
    }

    /// Parse a line, treating bad app-id tokens according to `policy`
    pub fn parse_with_policy(
        line: &str,
        policy: AppIdPolicy,
    ) -> std::result::Result<Self, ParseError> {
        let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if parts.len() < MIN_LINE_FIELDS {
            return Err(ParseError::MalformedLine {
                fields: parts.len(),
            });
        }

        let lat = parse_coordinate("latitude", parts[2])?;
        let lon = parse_coordinate("longitude", parts[3])?;
        let apps = parse_app_ids(parts[4], policy)?;

        Ok(Self {
            dev_type: parts[0].to_string(),
            dev_id: parts[1].to_string(),
            lat,
            lon,
            apps,
        })
    }

    /// Store key, `"{dev_type}:{dev_id}"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }

    /// Payload written under [`AppsInstalled::key`]
    pub fn to_user_apps(&self) -> UserApps {
        UserApps {
            lat: Some(self.lat),
            lon: Some(self.lon),
            apps: self.apps.clone(),
        }
    }
}

fn parse_coordinate(field: &'static str, value: &str) -> std::result::Result<f64, ParseError> {
    value
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidCoordinate {
            field,
            value: value.to_string(),
        })
}

fn parse_app_ids(raw: &str, policy: AppIdPolicy) -> std::result::Result<Vec<u32>, ParseError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let mut apps = Vec::new();
    for token in raw.split(APP_ID_DELIMITER) {
        // Values outside u32 wrap like an unchecked integer cast
        match token.trim().parse::<i64>() {
            Ok(value) => apps.push(value as u32),
            Err(_) => match policy {
                AppIdPolicy::Coerce => apps.push(0),
                AppIdPolicy::Skip => {}
                AppIdPolicy::Reject => {
                    return Err(ParseError::InvalidAppId {
                        token: token.to_string(),
                    });
                }
            },
        }
    }
    Ok(apps)
}

/// Binary payload stored per device
///
/// Coordinates are optional so that presence survives the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserApps {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub apps: Vec<u32>,
}

impl UserApps {
    /// Encode to the compact wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode from the compact wire form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
