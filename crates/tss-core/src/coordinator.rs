//! Ceremony coordinator
//!
//! Turns one logical request ("create a wallet", "sign this hash") into a
//! trigger on the cluster control plane plus a bounded wait on the
//! session's result channel.
//!
//! A `Timeout` after a successful trigger does not mean the ceremony failed
//! on the cluster; it may still complete. Whole ceremonies are never retried
//! here: a retry needs a fresh session id.

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::cluster::{Broker, ControlPlane, Subscription};
use crate::listener::{self, CeremonyResult};
use crate::signature::{self, CanonicalSignature, HASH_LEN};
use crate::{
    ActionRequest, ChannelKey, CoordinatorConfig, Error, KeyMaterial, Purpose, RawSignature,
    Result, Session, SessionId,
};

/// Runs keygen and signing ceremonies against one cluster
pub struct Coordinator<C, B> {
    control_plane: C,
    broker: B,
    config: CoordinatorConfig,
}

impl<C, B> Coordinator<C, B>
where
    C: ControlPlane,
    B: Broker,
{
    /// Create a coordinator; the configuration is validated up front
    pub fn new(control_plane: C, broker: B, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            control_plane,
            broker,
            config,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run distributed key generation for a new wallet
    #[instrument(skip(self), fields(session = %session_id))]
    pub async fn create_wallet(&self, session_id: &SessionId) -> Result<KeyMaterial> {
        let session = self.session(session_id, Purpose::Keygen)?;
        info!(parties = ?session.parties(), threshold = session.threshold(), "Starting keygen");

        let request = ActionRequest::keygen(&session);
        let material = listener::expect_keygen(self.run_ceremony(&session, &request).await?)?;

        info!(address = material.address(), "Keygen completed");
        Ok(material)
    }

    /// Run a signing ceremony and return the cluster's DER signature as is
    #[instrument(skip(self, share_data, message_hash), fields(session = %session_id))]
    pub async fn sign_raw(
        &self,
        session_id: &SessionId,
        share_data: &[u8],
        message_hash: &[u8],
    ) -> Result<RawSignature> {
        if message_hash.len() != HASH_LEN {
            return Err(Error::InvalidConfig(format!(
                "Message hash must be {} bytes, got {}",
                HASH_LEN,
                message_hash.len()
            )));
        }

        let session = self.session(session_id, Purpose::Sign)?;
        info!(
            parties = ?session.parties(),
            threshold = session.threshold(),
            hash = hex::encode(message_hash),
            "Starting signing"
        );

        let request = ActionRequest::sign(&session, share_data, message_hash);
        listener::expect_signature(self.run_ceremony(&session, &request).await?)
    }

    /// Run a signing ceremony and convert the result into a canonical
    /// signature recovering to `expected_address`
    pub async fn sign(
        &self,
        session_id: &SessionId,
        share_data: &[u8],
        message_hash: &[u8],
        expected_address: &str,
    ) -> Result<CanonicalSignature> {
        let raw = self.sign_raw(session_id, share_data, message_hash).await?;
        let canonical =
            signature::to_canonical_signature(raw.as_der(), message_hash, expected_address)?;

        info!(
            session = %session_id,
            r = hex::encode(canonical.r),
            s = hex::encode(canonical.s),
            recovery_id = canonical.recovery_id,
            "Signing completed"
        );
        Ok(canonical)
    }

    fn session(&self, id: &SessionId, purpose: Purpose) -> Result<Session> {
        Session::new(
            id.clone(),
            purpose,
            self.config.parties.clone(),
            self.config.threshold,
        )
    }

    async fn run_ceremony(
        &self,
        session: &Session,
        request: &ActionRequest,
    ) -> Result<CeremonyResult> {
        let deadline = Instant::now()
            .checked_add(self.config.ceremony_timeout)
            .ok_or_else(|| Error::InvalidConfig("Ceremony timeout out of range".into()))?;
        let channel = session.channel();

        let early = if self.config.subscribe_before_trigger {
            Some(self.subscribe(&channel, deadline).await?)
        } else {
            None
        };

        // On failure `early` is dropped, which releases it
        self.trigger(request, deadline).await?;

        let subscription = match early {
            Some(subscription) => subscription,
            None => self.subscribe(&channel, deadline).await?,
        };

        listener::wait_for_result(subscription, &channel, deadline).await
    }

    async fn subscribe(&self, channel: &ChannelKey, deadline: Instant) -> Result<Subscription> {
        debug!(channel = %channel, "Subscribing");
        tokio::time::timeout_at(deadline, self.broker.subscribe(channel))
            .await
            .map_err(|_| Error::Timeout(format!("subscription to {}", channel)))?
    }

    async fn trigger(&self, request: &ActionRequest, deadline: Instant) -> Result<()> {
        debug!(action = ?request.action, "Notifying control plane");

        match tokio::time::timeout_at(deadline, self.control_plane.notify_action(request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::TriggerFailed(format!(
                "{:?} for session {}: {}",
                request.action, request.session_id, e
            ))),
            Err(_) => Err(Error::TriggerFailed(format!(
                "{:?} for session {}: deadline elapsed",
                request.action, request.session_id
            ))),
        }
    }
}
