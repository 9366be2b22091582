//! Client side of a peer connection.
//!
//! A [`PeerClient`] wraps one outbound connection. `authenticate` may run
//! first; every other operation is terminal and consumes the client, since
//! the server closes after one logical exchange.

use crate::crypto::{generate_response, Challenge};
use crate::error::{Error, Result};
use crate::identity::{NodeIdentity, OnionAddress};
use crate::logging::{RedactedBytes, RedactedOnion};
use crate::protocol::{
    write_packet, AuthPayload, ChallengePayload, ContactRequestPayload, FrameReader, PacketType,
    PullPayload, PushPostPayload, PushProfilePayload, ResponsePayload, INBOUND_PAYLOAD_LIMIT,
};
use crate::storage::{IncomingPost, ProfileField};
use crate::tor::OnionConnection;
use std::time::Duration;

/// Everything one PULL returned.
#[derive(Debug, Default, Clone)]
pub struct PullReply {
    pub posts: Vec<IncomingPost>,
    pub profiles: Vec<ProfileField>,
}

impl PullReply {
    /// True if the peer sent nothing.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.profiles.is_empty()
    }
}

/// An outbound connection driven through the client half of the protocol.
pub struct PeerClient {
    conn: OnionConnection,
    io_timeout: Duration,
}

impl PeerClient {
    pub fn new(conn: OnionConnection, io_timeout: Duration) -> Self {
        Self {
            conn,
            io_timeout,
        }
    }

    /// The onion this client dialed.
    pub fn peer(&self) -> &OnionAddress {
        self.conn.peer()
    }

    async fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<()> {
        write_packet(self.conn.stream_mut(), packet_type, payload, self.io_timeout).await
    }

    /// Read one small frame and require its type.
    async fn receive(&mut self, expected: PacketType) -> Result<Vec<u8>> {
        let mut reader = FrameReader::inbound(INBOUND_PAYLOAD_LIMIT, self.io_timeout);
        let frame = reader.read_frame(self.conn.stream_mut()).await?;
        if frame.packet_type() != expected {
            return Err(Error::Protocol(format!(
                "expected {:?}, got {:?}",
                expected,
                frame.packet_type()
            )));
        }
        Ok(frame.payload.to_vec())
    }

    /// Prove our identity: AUTH, CHALLENGE, RESPONSE, SUCCESS.
    pub async fn authenticate(&mut self, identity: &NodeIdentity) -> Result<()> {
        let auth = AuthPayload::from_public_key(identity.public_key())?;
        self.send(PacketType::Auth, &auth.to_bytes()?).await?;

        let payload = self.receive(PacketType::Challenge).await?;
        let challenge: Challenge = ChallengePayload::from_bytes(&payload)
            .map_err(|e| Error::Protocol(format!("bad challenge: {}", e)))?
            .into();
        tracing::debug!(
            key = %RedactedBytes(&challenge.pub_key),
            enc = %RedactedBytes(&challenge.enc),
            "Received challenge"
        );

        let response = generate_response(&challenge, identity.private_key(), self.conn.peer())?;
        let response = ResponsePayload::from(response);
        self.send(PacketType::Response, &response.to_bytes()?).await?;

        self.receive(PacketType::Success).await?;

        tracing::debug!(peer = %RedactedOnion(self.peer().as_str()), "Authenticated");
        Ok(())
    }

    /// Request everything newer than `since`.
    ///
    /// Posts come back with their originator bound to the dialed onion.
    /// Nothing is returned unless the stream ends with SUCCESS.
    pub async fn pull(mut self, since: i64, limit: u32) -> Result<PullReply> {
        self.send(PacketType::Pull, &PullPayload::encode(since)?).await?;

        let origin = self.conn.peer().clone();
        let mut reader = FrameReader::pull(limit, self.io_timeout);
        let mut reply = PullReply::default();

        loop {
            let frame = reader.read_frame(self.conn.stream_mut()).await?;
            match frame.packet_type() {
                PacketType::PushPost => {
                    reply.posts.push(PushPostPayload::decode(frame.payload, &origin)?)
                }
                PacketType::PushProfile => {
                    reply.profiles.push(PushProfilePayload::decode(frame.payload)?)
                }
                PacketType::Success => break,
                other => {
                    return Err(Error::Protocol(format!("unexpected {:?} in pull stream", other)));
                }
            }
        }

        tracing::debug!(
            peer = %RedactedOnion(origin.as_str()),
            posts = reply.posts.len(),
            profiles = reply.profiles.len(),
            "Pull complete"
        );

        let _ = self.conn.close().await;
        Ok(reply)
    }

    /// Tell the peer we have new content for it.
    pub async fn trigger(mut self) -> Result<()> {
        self.send(PacketType::Trigger, &[]).await?;
        self.receive(PacketType::Success).await?;
        let _ = self.conn.close().await;
        Ok(())
    }

    /// Ask the peer to add us as a contact.
    pub async fn send_contact_request(mut self, message: &str, own: &OnionAddress) -> Result<()> {
        let request = ContactRequestPayload {
            message: message.to_string(),
            onion: own.to_string(),
        };
        self.send(PacketType::ContactRequest, &request.to_bytes()?).await?;
        self.receive(PacketType::Success).await?;
        let _ = self.conn.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_identity;
    use crate::protocol::{encode, write_framed};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    const T: Duration = Duration::from_secs(5);

    fn client_pair(peer: &OnionAddress) -> (PeerClient, DuplexStream) {
        let (a, b) = duplex(64 * 1024);
        let conn = OnionConnection::new(Box::new(a), peer.clone());
        (PeerClient::new(conn, T), b)
    }

    async fn read_request(server: &mut DuplexStream) -> (PacketType, Vec<u8>) {
        let mut reader = FrameReader::inbound(INBOUND_PAYLOAD_LIMIT, T);
        let frame = reader.read_frame(server).await.expect("request");
        (frame.packet_type(), frame.payload.to_vec())
    }

    async fn reply(server: &mut DuplexStream, packet_type: PacketType, payload: &[u8]) {
        write_packet(server, packet_type, payload, T).await.expect("reply");
    }

    #[tokio::test]
    async fn test_pull_binds_originator() {
        let peer = generate_identity().expect("identity");
        let author = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());

        let author_onion = author.onion_address().to_string();
        let task = tokio::spawn(async move {
            let (pt, payload) = read_request(&mut server).await;
            assert_eq!(pt, PacketType::Pull);
            assert_eq!(PullPayload::decode(&payload).expect("since"), 42);

            let post = PushPostPayload {
                message: "hi".into(),
                posted_at: 1,
                published_at: 2,
                ttl: 3,
                author: author_onion,
                hash: "h".into(),
                parent_hash: String::new(),
            };
            reply(&mut server, PacketType::PushPost, &post.to_bytes().expect("post")).await;
            let profile = PushProfilePayload {
                key: "name".into(),
                value: "Bob".into(),
                changed_at: 5,
            };
            let bytes = profile.to_bytes().expect("profile");
            reply(&mut server, PacketType::PushProfile, &bytes).await;
            reply(&mut server, PacketType::Success, &[]).await;
        });

        let got = client.pull(42, 1024 * 1024).await.expect("pull");
        task.await.expect("server");

        assert_eq!(got.posts.len(), 1);
        assert_eq!(&got.posts[0].originator, peer.onion_address());
        assert_eq!(&got.posts[0].author, author.onion_address());
        assert_eq!(got.profiles[0].value, "Bob");
    }

    #[tokio::test]
    async fn test_pull_rejects_unexpected_frame() {
        let peer = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());
        tokio::spawn(async move {
            read_request(&mut server).await;
            reply(&mut server, PacketType::Challenge, b"{}").await;
        });
        assert!(matches!(client.pull(0, 1024).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_pull_enforces_ceiling() {
        let peer = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());
        tokio::spawn(async move {
            read_request(&mut server).await;
            let bytes = encode(PacketType::PushPost, &[0u8; 2048]).expect("encode");
            let _ = write_framed(&mut server, &bytes, T).await;
        });
        assert!(matches!(
            client.pull(0, 1024).await,
            Err(Error::ResourceLimitExceeded { length: 2048, limit: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_trigger_expects_success() {
        let peer = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());
        tokio::spawn(async move {
            let (pt, payload) = read_request(&mut server).await;
            assert_eq!(pt, PacketType::Trigger);
            assert!(payload.is_empty());
            reply(&mut server, PacketType::Success, &[]).await;
        });
        client.trigger().await.expect("trigger");
    }

    #[tokio::test]
    async fn test_trigger_closed_without_reply() {
        let peer = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());
        tokio::spawn(async move {
            read_request(&mut server).await;
            drop(server);
        });
        assert!(matches!(client.trigger().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_contact_request_payload() {
        let peer = generate_identity().expect("identity");
        let me = generate_identity().expect("identity");
        let (client, mut server) = client_pair(peer.onion_address());
        let task = tokio::spawn(async move {
            let (pt, payload) = read_request(&mut server).await;
            reply(&mut server, PacketType::Success, &[]).await;
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
            (pt, ContactRequestPayload::from_bytes(&payload).expect("request"))
        });

        client
            .send_contact_request("hello", me.onion_address())
            .await
            .expect("request");
        let (pt, request) = task.await.expect("server");
        assert_eq!(pt, PacketType::ContactRequest);
        assert_eq!(request.message, "hello");
        assert_eq!(&request.onion().expect("onion"), me.onion_address());
    }
}
