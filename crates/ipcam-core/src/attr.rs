//! Configuration attributes
//!
//! Each camera carries a set of named configuration attributes. An attribute
//! describes its data type, an optional default and bounds, and whether its
//! value is secret. Secret values are kept in the registry but never leave it
//! through discovery snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::registry::RegistryError;

/// Attribute name to value mapping, as used by configuration requests
pub type AttrMap = BTreeMap<String, String>;

/// Data type of a configuration attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
}

/// A single configuration attribute of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAttr {
    pub data_type: DataType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl ConfigAttr {
    pub fn string(description: &str) -> Self {
        Self {
            data_type: DataType::String,
            description: description.to_string(),
            default: None,
            value: None,
            secret: false,
            min: None,
            max: None,
        }
    }

    pub fn int(description: &str, min: i64, max: i64) -> Self {
        Self {
            data_type: DataType::Int,
            min: Some(min),
            max: Some(max),
            ..Self::string(description)
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Effective value: the set value, else the default
    pub fn effective(&self) -> Option<&str> {
        self.value.as_deref().or(self.default.as_deref())
    }

    /// Validate a proposed value and return the value to store.
    ///
    /// Int attributes must parse as an integer and are clamped into
    /// `[min, max]`. String attributes are stored as given.
    pub fn accept(&self, name: &str, proposed: &str) -> Result<String, RegistryError> {
        match self.data_type {
            DataType::String => Ok(proposed.to_string()),
            DataType::Int => {
                let parsed: i64 = proposed.trim().parse().map_err(|_| RegistryError::InvalidValue {
                    attr: name.to_string(),
                    value: proposed.to_string(),
                })?;
                let mut clamped = parsed;
                if let Some(min) = self.min {
                    clamped = clamped.max(min);
                }
                if let Some(max) = self.max {
                    clamped = clamped.min(max);
                }
                if clamped != parsed {
                    tracing::warn!(
                        attr = %name,
                        requested = parsed,
                        applied = clamped,
                        "Configuration value out of range, clamped"
                    );
                }
                Ok(clamped.to_string())
            }
        }
    }

    /// Copy of this attribute that is safe to publish
    pub fn redacted(&self) -> Self {
        if self.secret {
            Self {
                default: None,
                value: None,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }
}
