//! Core types for ceremony coordination

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::{Error, Result};

/// Identifier of a party in the MPC cluster
pub type PartyId = u32;

/// Longest session id accepted
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Correlation token scoping exactly one ceremony.
///
/// Uniqueness per ceremony is the caller's contract: the cluster treats a
/// reused id as the same ceremony, so retries must allocate a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a caller-supplied id
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidConfig("Session id cannot be empty".into()));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidConfig(format!(
                "Session id longer than {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidConfig(format!(
                "Session id contains invalid characters: {}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Random id for one-off ceremonies
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Id derived from a user identifier and a per-user nonce
    pub fn for_user(user: &str, nonce: u64) -> Result<Self> {
        Self::new(format!("{}-{}", user, nonce))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// What a ceremony produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Keygen,
    Sign,
}

impl Purpose {
    /// Broker channel prefix for this purpose
    pub fn channel_prefix(self) -> &'static str {
        match self {
            Purpose::Keygen => "keygen:",
            Purpose::Sign => "sign:",
        }
    }

    /// Control-plane action that starts this ceremony
    pub fn action(self) -> Action {
        match self {
            Purpose::Keygen => Action::InitKeygen,
            Purpose::Sign => Action::InitSign,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Keygen => write!(f, "keygen"),
            Purpose::Sign => write!(f, "sign"),
        }
    }
}

/// Control-plane action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    InitKeygen,
    InitSign,
}

impl Action {
    /// Ceremony this action starts
    pub fn purpose(self) -> Purpose {
        match self {
            Action::InitKeygen => Purpose::Keygen,
            Action::InitSign => Purpose::Sign,
        }
    }
}

/// Name of the broker channel carrying one session's result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    purpose: Purpose,
    name: String,
}

impl ChannelKey {
    pub fn new(purpose: Purpose, session_id: &SessionId) -> Self {
        Self {
            purpose,
            name: format!("{}{}", purpose.channel_prefix(), session_id),
        }
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Check a party set and threshold: `1 <= threshold <= |parties|`, no duplicates
pub fn validate_parties(parties: &[PartyId], threshold: u32) -> Result<()> {
    if parties.is_empty() {
        return Err(Error::InvalidConfig("Party set cannot be empty".into()));
    }
    let unique: BTreeSet<_> = parties.iter().collect();
    if unique.len() != parties.len() {
        return Err(Error::InvalidConfig("Party set contains duplicates".into()));
    }
    if threshold < 1 {
        return Err(Error::InvalidConfig("Threshold must be at least 1".into()));
    }
    if threshold as usize > parties.len() {
        return Err(Error::InvalidConfig(
            "Threshold cannot exceed number of parties".into(),
        ));
    }
    Ok(())
}

/// One ceremony's scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    purpose: Purpose,
    parties: Vec<PartyId>,
    threshold: u32,
}

impl Session {
    /// Create a session, rejecting an invalid party set or threshold
    pub fn new(
        id: SessionId,
        purpose: Purpose,
        parties: Vec<PartyId>,
        threshold: u32,
    ) -> Result<Self> {
        validate_parties(&parties, threshold)?;
        Ok(Self {
            id,
            purpose,
            parties,
            threshold,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Broker channel for this session's result
    pub fn channel(&self) -> ChannelKey {
        ChannelKey::new(self.purpose, &self.id)
    }
}

/// Wire request that triggers a ceremony on the cluster
#[derive(Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub session_id: SessionId,
    pub parties: Vec<PartyId>,
    pub threshold: u32,
    pub action: Action,
    /// Digest to sign (signing only)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub msg_hash: Option<Vec<u8>>,
    /// Caller-held key share (signing only)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    pub share_data: Option<Vec<u8>>,
}

impl ActionRequest {
    /// Key generation trigger
    pub fn keygen(session: &Session) -> Self {
        Self {
            session_id: session.id().clone(),
            parties: session.parties().to_vec(),
            threshold: session.threshold(),
            action: Action::InitKeygen,
            msg_hash: None,
            share_data: None,
        }
    }

    /// Signing trigger carrying the digest and the caller's share
    pub fn sign(session: &Session, share_data: &[u8], msg_hash: &[u8]) -> Self {
        Self {
            session_id: session.id().clone(),
            parties: session.parties().to_vec(),
            threshold: session.threshold(),
            action: Action::InitSign,
            msg_hash: Some(msg_hash.to_vec()),
            share_data: Some(share_data.to_vec()),
        }
    }
}

impl fmt::Debug for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRequest")
            .field("session_id", &self.session_id)
            .field("parties", &self.parties)
            .field("threshold", &self.threshold)
            .field("action", &self.action)
            .field("msg_hash", &self.msg_hash.as_ref().map(hex::encode))
            .field("share_data", &self.share_data.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Drop for ActionRequest {
    fn drop(&mut self) {
        if let Some(share) = self.share_data.as_mut() {
            share.zeroize();
        }
    }
}

/// Key generation result
pub struct KeyMaterial {
    share: Zeroizing<Vec<u8>>,
    address: String,
}

impl KeyMaterial {
    pub fn new(share: Vec<u8>, address: String) -> Self {
        Self {
            share: Zeroizing::new(share),
            address,
        }
    }

    /// Opaque key share to hand back on every signing request
    pub fn share(&self) -> &[u8] {
        &self.share
    }

    /// Public address reported by the cluster
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("share", &"<redacted>")
            .field("address", &self.address)
            .finish()
    }
}

/// DER-encoded signature as produced by the cluster
#[derive(Clone, PartialEq, Eq)]
pub struct RawSignature(Vec<u8>);

impl RawSignature {
    pub fn new(der: Vec<u8>) -> Self {
        Self(der)
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSignature({} bytes)", self.0.len())
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::new("user-42.7_a").is_ok());
        assert!(SessionId::new("").is_err());
        assert!(SessionId::new("has space").is_err());
        assert!(SessionId::new("keygen:x").is_err());
        assert!(SessionId::new("x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());

        assert_eq!(SessionId::for_user("alice", 3).unwrap().as_str(), "alice-3");
        assert_ne!(SessionId::random(), SessionId::random());
    }

    #[test]
    fn test_session_rejects_bad_threshold() {
        let err = Session::new(sid("s1"), Purpose::Keygen, vec![1, 2, 3], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Session::new(sid("s1"), Purpose::Keygen, vec![1, 2, 3], 4).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Session::new(sid("s1"), Purpose::Sign, vec![], 1).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let err = Session::new(sid("s1"), Purpose::Sign, vec![1, 1, 2], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let session = Session::new(sid("s1"), Purpose::Sign, vec![1, 2, 3], 3).unwrap();
        assert_eq!(session.threshold(), 3);
    }

    #[test]
    fn test_channel_key() {
        let session = Session::new(sid("s1"), Purpose::Keygen, vec![1, 2, 3], 2).unwrap();
        assert_eq!(session.channel().as_str(), "keygen:s1");
        assert_eq!(ChannelKey::new(Purpose::Sign, &sid("s1")).as_str(), "sign:s1");
    }

    #[test]
    fn test_action_request_wire_format() {
        let session = Session::new(sid("s1"), Purpose::Sign, vec![1, 2, 3], 2).unwrap();
        let request = ActionRequest::sign(&session, b"share", &[0xab; 4]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["action"], "INIT_SIGN");
        assert_eq!(json["threshold"], 2);
        assert_eq!(json["share_data"], "c2hhcmU=");
        assert_eq!(json["msg_hash"], "q6urqw==");

        let keygen = Session::new(sid("s2"), Purpose::Keygen, vec![1, 2], 2).unwrap();
        let json = serde_json::to_value(ActionRequest::keygen(&keygen)).unwrap();
        assert_eq!(json["action"], "INIT_KEYGEN");
        assert!(json.get("share_data").is_none());

        let decoded: ActionRequest = serde_json::from_value(
            serde_json::to_value(&request).unwrap(),
        )
        .unwrap();
        assert_eq!(decoded.share_data.as_deref(), Some(&b"share"[..]));
    }

    #[test]
    fn test_debug_redacts_share() {
        let session = Session::new(sid("s1"), Purpose::Sign, vec![1, 2], 2).unwrap();
        let request = ActionRequest::sign(&session, b"top-secret", &[1; 32]);
        assert!(!format!("{:?}", request).contains("top-secret"));

        let material = KeyMaterial::new(b"top-secret".to_vec(), "0xabc".into());
        let rendered = format!("{:?}", material);
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("0xabc"));
    }
}
