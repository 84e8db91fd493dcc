//! Result envelopes observed on a ceremony channel

use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;

use crate::{KeyMaterial, Purpose, RawSignature, Result};

/// Base64 key share field (keygen)
pub const SHARE_DATA: &str = "share_data";
/// Hex address / public key string field (keygen)
pub const PUB_KEY: &str = "pub_key";
/// Base64 DER signature field (sign)
pub const SIGNATURE: &str = "signature";

/// Fields a message must carry before it counts as a result
pub fn required_fields(purpose: Purpose) -> &'static [&'static str] {
    match purpose {
        Purpose::Keygen => &[SHARE_DATA, PUB_KEY],
        Purpose::Sign => &[SIGNATURE],
    }
}

/// Decoded outcome of a ceremony
#[derive(Debug)]
pub enum CeremonyResult {
    Keygen(KeyMaterial),
    Sign(RawSignature),
}

/// What one envelope means for the wait
#[derive(Debug)]
pub enum Completion {
    /// Progress frame, keep waiting
    Partial,
    /// Every required field is present and decoded
    Complete(CeremonyResult),
    /// Required fields are present but a payload does not decode
    Corrupt(String),
}

/// One JSON object read from the result stream.
///
/// Only string-valued members are kept; anything else is treated as absent.
#[derive(Debug, Clone, Default)]
pub struct ResultEnvelope {
    fields: HashMap<String, String>,
}

impl ResultEnvelope {
    /// Parse a stream payload
    pub fn parse(payload: &str) -> Result<Self> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(payload)?;

        let fields = object
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                _ => None,
            })
            .collect();

        Ok(Self { fields })
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_complete(&self, purpose: Purpose) -> bool {
        required_fields(purpose)
            .iter()
            .all(|field| self.fields.contains_key(*field))
    }

    /// Interpret the envelope for a ceremony of `purpose`
    pub fn complete(&self, purpose: Purpose) -> Completion {
        match purpose {
            Purpose::Keygen => {
                let (Some(share), Some(pub_key)) = (self.get(SHARE_DATA), self.get(PUB_KEY)) else {
                    return Completion::Partial;
                };
                match STANDARD.decode(share) {
                    Ok(share) => Completion::Complete(CeremonyResult::Keygen(KeyMaterial::new(
                        share,
                        pub_key.to_string(),
                    ))),
                    Err(e) => Completion::Corrupt(format!("{}: {}", SHARE_DATA, e)),
                }
            }
            Purpose::Sign => {
                let Some(signature) = self.get(SIGNATURE) else {
                    return Completion::Partial;
                };
                match STANDARD.decode(signature) {
                    Ok(der) => Completion::Complete(CeremonyResult::Sign(RawSignature::new(der))),
                    Err(e) => Completion::Corrupt(format!("{}: {}", SIGNATURE, e)),
                }
            }
        }
    }
}
