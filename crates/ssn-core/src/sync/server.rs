//! Server side of a peer connection.
//!
//! Each inbound connection runs a small state machine. The packets legal in
//! each state come from [`ALLOWED`]; anything else is a protocol violation,
//! logged as a security event, and the connection is dropped without a
//! reply. PULL, TRIGGER and CONTACT_REQUEST are terminal: one logical
//! exchange per connection.

use super::engine::SyncEngine;
use crate::crypto::auth::NONCE_SIZE;
use crate::crypto::{generate_challenge, verify_response, Response};
use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use crate::logging::RedactedOnion;
use crate::protocol::{
    write_packet, AuthPayload, ChallengePayload, ContactRequestPayload, FrameReader, PacketType,
    PullPayload, PushPostPayload, PushProfilePayload, ResponsePayload,
};
use crate::security_event;
use crate::storage::{Contact, ContactStatus, PendingKind};
use crate::tor::AsyncStream;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Fresh connection.
    Unauthenticated,
    /// AUTH accepted, waiting for the RESPONSE.
    ChallengeSent,
    /// The peer proved its key.
    Authenticated,
}

/// Legal packets per state.
pub const ALLOWED: [(StateKind, &[PacketType]); 3] = [
    (
        StateKind::Unauthenticated,
        &[PacketType::Auth, PacketType::Pull, PacketType::ContactRequest],
    ),
    (StateKind::ChallengeSent, &[PacketType::Response]),
    (StateKind::Authenticated, &[PacketType::Trigger, PacketType::Pull]),
];

impl StateKind {
    /// Packets accepted in this state.
    pub fn allowed(self) -> &'static [PacketType] {
        ALLOWED
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, allowed)| *allowed)
            .unwrap_or(&[])
    }

    /// Whether `packet_type` is legal in this state.
    pub fn accepts(self, packet_type: PacketType) -> bool {
        self.allowed().contains(&packet_type)
    }
}

enum State {
    Unauthenticated,
    ChallengeSent {
        nonce: Zeroizing<[u8; NONCE_SIZE]>,
        contact: Contact,
    },
    Authenticated {
        contact: Contact,
    },
}

impl State {
    fn kind(&self) -> StateKind {
        match self {
            State::Unauthenticated => StateKind::Unauthenticated,
            State::ChallengeSent { .. } => StateKind::ChallengeSent,
            State::Authenticated { .. } => StateKind::Authenticated,
        }
    }

    fn contact(&self) -> Option<&Contact> {
        match self {
            State::Unauthenticated => None,
            State::ChallengeSent { contact, .. } | State::Authenticated { contact } => {
                Some(contact)
            }
        }
    }
}

/// What a handler leaves behind.
enum Next {
    Continue(State),
    Close,
}

/// Serve one inbound connection to completion.
///
/// Errors end the connection; they never propagate past it.
pub async fn serve_connection<S>(engine: Arc<SyncEngine>, mut stream: S)
where
    S: AsyncStream,
{
    match run(&engine, &mut stream).await {
        Ok(()) => tracing::debug!("Connection finished"),
        Err(e) if e.is_security_event() => security_event!(error = %e, "Connection dropped"),
        Err(e) => tracing::debug!(error = %e, "Connection dropped"),
    }
}

async fn run<S: AsyncStream>(engine: &Arc<SyncEngine>, stream: &mut S) -> Result<()> {
    let io_timeout = engine.config().io_timeout;
    let mut reader = FrameReader::inbound(engine.config().inbound_payload_limit, io_timeout);
    let mut state = State::Unauthenticated;

    loop {
        let frame = reader.read_frame(stream).await?;
        let packet_type = frame.packet_type();

        if !state.kind().accepts(packet_type) {
            security_event!(
                packet = ?packet_type,
                state = ?state.kind(),
                "Packet not allowed in this state, closing"
            );
            return Ok(());
        }

        let handler = Handler {
            engine,
            io_timeout,
        };
        let next = match packet_type {
            PacketType::Auth => handler.auth(stream, frame.payload).await?,
            PacketType::Response => handler.response(stream, frame.payload, state).await?,
            PacketType::Pull => handler.pull(stream, frame.payload, state.contact()).await?,
            PacketType::Trigger => handler.trigger(stream, state).await?,
            PacketType::ContactRequest => handler.contact_request(stream, frame.payload).await?,
            other => return Err(Error::Protocol(format!("no handler for {:?}", other))),
        };

        match next {
            Next::Continue(s) => state = s,
            Next::Close => return Ok(()),
        }
    }
}

struct Handler<'a> {
    engine: &'a Arc<SyncEngine>,
    io_timeout: Duration,
}

impl Handler<'_> {
    async fn send<S: AsyncStream>(
        &self,
        stream: &mut S,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<()> {
        write_packet(stream, packet_type, payload, self.io_timeout).await
    }

    /// Challenge a presented key. Only friendly contacts get a challenge.
    async fn auth<S: AsyncStream>(&self, stream: &mut S, payload: &[u8]) -> Result<Next> {
        let auth = AuthPayload::from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("bad auth payload: {}", e)))?;
        let prover = auth.public_key()?;
        let onion = OnionAddress::from_public_key(&prover)?;

        let contact = self
            .engine
            .store()
            .lock()
            .await
            .friendly_contact_by_onion(&onion)?;
        let contact = match contact {
            Some(c) => c,
            None => {
                security_event!(
                    peer = %RedactedOnion(onion.as_str()),
                    "AUTH from unknown or unfriendly onion"
                );
                return Ok(Next::Close);
            }
        };

        let (challenge, nonce) = generate_challenge(&prover, self.engine.identity().public_key())?;
        let challenge = ChallengePayload::from(challenge);
        self.send(stream, PacketType::Challenge, &challenge.to_bytes()?).await?;

        tracing::debug!(peer = %RedactedOnion(onion.as_str()), "Challenge sent");
        Ok(Next::Continue(State::ChallengeSent {
            nonce: Zeroizing::new(nonce),
            contact,
        }))
    }

    async fn response<S: AsyncStream>(
        &self,
        stream: &mut S,
        payload: &[u8],
        state: State,
    ) -> Result<Next> {
        let (nonce, contact) = match state {
            State::ChallengeSent { nonce, contact } => (nonce, contact),
            _ => return Err(Error::Protocol("response without challenge".into())),
        };
        let response: Response = ResponsePayload::from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("bad response payload: {}", e)))?
            .into();

        if let Err(e) = verify_response(&response, &nonce) {
            security_event!(
                peer = %RedactedOnion(contact.onion.as_str()),
                error = %e,
                "Challenge response rejected"
            );
            return Ok(Next::Close);
        }

        self.send(stream, PacketType::Success, &[]).await?;
        tracing::debug!(peer = %RedactedOnion(contact.onion.as_str()), "Peer authenticated");
        Ok(Next::Continue(State::Authenticated { contact }))
    }

    /// Stream posts and profiles newer than the requested timestamp.
    ///
    /// Without an authenticated contact only public content is served.
    async fn pull<S: AsyncStream>(
        &self,
        stream: &mut S,
        payload: &[u8],
        contact: Option<&Contact>,
    ) -> Result<Next> {
        let since = PullPayload::decode(payload)
            .map_err(|e| Error::Protocol(format!("bad pull payload: {}", e)))?;

        let (posts, profiles) = {
            let store = self.engine.store().lock().await;
            (
                store.posts_visible_to(contact, since)?,
                store.profiles_visible_to(contact, since)?,
            )
        };

        for post in &posts {
            let payload = PushPostPayload::from_post(post).to_bytes()?;
            self.send(stream, PacketType::PushPost, &payload).await?;
        }
        for profile in &profiles {
            let payload = PushProfilePayload::from(profile).to_bytes()?;
            self.send(stream, PacketType::PushProfile, &payload).await?;
        }
        self.send(stream, PacketType::Success, &[]).await?;

        tracing::debug!(
            authenticated = contact.is_some(),
            posts = posts.len(),
            profiles = profiles.len(),
            since,
            "Served pull"
        );
        Ok(Next::Close)
    }

    /// Acknowledge, then pull back from the authenticated contact.
    async fn trigger<S: AsyncStream>(&self, stream: &mut S, state: State) -> Result<Next> {
        let contact = match state {
            State::Authenticated { contact } => contact,
            _ => return Err(Error::Protocol("trigger before authentication".into())),
        };
        self.send(stream, PacketType::Success, &[]).await?;

        tracing::debug!(peer = %RedactedOnion(contact.onion.as_str()), "Triggered, pulling back");
        match self.engine.sync_contact(&contact).await {
            Ok(outcome) => tracing::info!(
                peer = %RedactedOnion(contact.onion.as_str()),
                posts = outcome.posts,
                profiles = outcome.profiles,
                "Pulled after trigger"
            ),
            Err(e) => tracing::warn!(
                peer = %RedactedOnion(contact.onion.as_str()),
                error = %e,
                "Pull after trigger failed"
            ),
        }
        Ok(Next::Close)
    }

    /// Record a contact request.
    ///
    /// A request from someone we asked ourselves completes the handshake;
    /// from anyone else it becomes an OPEN contact awaiting the user.
    async fn contact_request<S: AsyncStream>(
        &self,
        stream: &mut S,
        payload: &[u8],
    ) -> Result<Next> {
        let request = ContactRequestPayload::from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("bad contact request: {}", e)))?;
        let onion = request.onion()?;
        if &onion == self.engine.onion() {
            security_event!("Contact request claims our own onion");
            return Ok(Next::Close);
        }

        {
            let store = self.engine.store().lock().await;
            match store.contact_by_onion(&onion)? {
                Some(contact) if contact.status == ContactStatus::Pending => {
                    store.promote_to_success(&contact)?;
                }
                Some(contact) => {
                    tracing::debug!(
                        peer = %RedactedOnion(onion.as_str()),
                        status = %contact.status,
                        "Contact request from known contact"
                    );
                }
                None => {
                    store.add_contact(
                        &onion,
                        onion.as_str(),
                        ContactStatus::Open,
                        &request.message,
                    )?;
                    tracing::info!(peer = %RedactedOnion(onion.as_str()), "New contact request");
                }
            }
            store.mark_pending(PendingKind::Contacts)?;
        }

        self.send(stream, PacketType::Success, &[]).await?;
        Ok(Next::Close)
    }
}
