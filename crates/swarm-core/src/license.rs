//! License key descriptor
//!
//! The descriptor is a small JSON document the user edits by hand:
//!
//! ```json
//! { "Key": "XXXX-XXXX", "Activated": false, "AccountID": "acct-42" }
//! ```
//!
//! Activation is asserted by the backend's validation service, never by the
//! user, so a descriptor that already claims `Activated: true` is rejected.
//! Only the file shape is checked here; the key itself is opaque.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::LicenseError;

/// Location of the descriptor relative to the base path
pub const DEFAULT_LICENSE_PATH: &str = "settings/LicenseKey.json";

const FIELD_KEY: &str = "Key";
const FIELD_ACTIVATED: &str = "Activated";
const FIELD_ACCOUNT_ID: &str = "AccountID";

/// Validated license descriptor
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct LicenseDescriptor {
    #[serde(rename = "Key", serialize_with = "serialize_redacted")]
    key: String,
    #[serde(rename = "Activated")]
    activated: bool,
    #[serde(rename = "AccountID")]
    account_id: String,
}

impl LicenseDescriptor {
    /// Read and validate the descriptor at `path`
    pub fn load(path: &Path) -> Result<Self, LicenseError> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LicenseError::NotFound(path.to_path_buf()),
            _ => LicenseError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::parse(&raw)
    }

    /// Validate descriptor contents
    pub fn parse(raw: &str) -> Result<Self, LicenseError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| LicenseError::malformed(format!("not valid JSON ({e})")))?;
        let fields = value
            .as_object()
            .ok_or_else(|| LicenseError::malformed("expected a JSON object at the top level"))?;

        // Self-activation is rejected whatever else the file contains
        if fields.get(FIELD_ACTIVATED) == Some(&Value::Bool(true)) {
            return Err(LicenseError::PrematureActivation);
        }

        let key = required_string(fields, FIELD_KEY)?;
        let activated = match fields.get(FIELD_ACTIVATED) {
            None => return Err(LicenseError::MissingField(FIELD_ACTIVATED)),
            Some(Value::Bool(flag)) => *flag,
            Some(_) => {
                return Err(LicenseError::malformed(format!(
                    "field `{FIELD_ACTIVATED}` must be a boolean"
                )));
            }
        };
        let account_id = required_string(fields, FIELD_ACCOUNT_ID)?;

        Ok(Self {
            key,
            activated,
            account_id,
        })
    }

    /// Opaque license key, handed to the backend untouched
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn activated(&self) -> bool {
        self.activated
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Key with everything but the last four characters masked
    pub fn redacted_key(&self) -> String {
        redact(&self.key)
    }
}

impl fmt::Debug for LicenseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseDescriptor")
            .field("key", &self.redacted_key())
            .field("activated", &self.activated)
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl fmt::Display for LicenseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {} (key {})", self.account_id, self.redacted_key())
    }
}

/// Resolve the descriptor path under a base directory
pub fn license_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_LICENSE_PATH)
}

fn required_string(fields: &Map<String, Value>, name: &'static str) -> Result<String, LicenseError> {
    match fields.get(name) {
        None => Err(LicenseError::MissingField(name)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(LicenseError::MissingField(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(LicenseError::malformed(format!("field `{name}` must be a string"))),
    }
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let visible = chars.len().min(4);
    let tail: String = chars[chars.len() - visible..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - visible), tail)
}

fn serialize_redacted<S: serde::Serializer>(key: &str, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&redact(key))
}
