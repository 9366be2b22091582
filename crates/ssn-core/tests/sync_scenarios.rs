//! Multi-node sync scenarios over the in-process network.

mod common;

use common::*;
use ssn_core::protocol::{
    write_packet, FrameReader, PacketType, PullPayload, INBOUND_PAYLOAD_LIMIT, PULL_PAYLOAD_LIMIT,
};
use ssn_core::storage::{post_hash, ContactStatus, PendingKind, Repository};
use ssn_core::sync::{serve_connection, ResyncScheduler};
use ssn_core::{Error, NodeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt};

const T: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_pending_contact_promoted_by_resync() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();

    add_contact(&alice, &bob, "bob", ContactStatus::Success).await;
    add_contact(&bob, &alice, "alice", ContactStatus::Pending).await;

    let report = bob.resync_all().await.expect("resync");
    assert_eq!(report.contacts, 1);
    assert_eq!(report.succeeded, 1);

    let stored = contact(&bob, alice.onion()).await;
    assert_eq!(stored.status, ContactStatus::Success);

    let store = bob.store().lock().await;
    let circle = store.circle_by_name("alice").expect("query").expect("circle");
    let members = store.circle_contacts(&circle).expect("members");
    assert_eq!(members.len(), 1);
    assert_eq!(&members[0].onion, alice.onion());
    assert!(store.take_pending(PendingKind::Contacts).expect("flag"));
}

#[tokio::test]
async fn test_contact_request_from_unknown_onion() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();

    bob.send_contact_request(alice.onion(), "let's connect")
        .await
        .expect("request");

    let stored = contact(&alice, bob.onion()).await;
    assert_eq!(stored.status, ContactStatus::Open);
    assert_eq!(stored.request_message, "let's connect");
    assert_eq!(stored.alias, bob.onion().as_str());
    assert!(alice
        .store()
        .lock()
        .await
        .take_pending(PendingKind::Contacts)
        .expect("flag"));
}

#[tokio::test]
async fn test_contact_request_completes_pending_handshake() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();

    add_contact(&alice, &bob, "bob", ContactStatus::Pending).await;
    bob.send_contact_request(alice.onion(), "").await.expect("request");

    assert_eq!(contact(&alice, bob.onion()).await.status, ContactStatus::Success);
    assert!(alice
        .store()
        .lock()
        .await
        .circle_by_name("bob")
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn test_anonymous_pull_sees_public_content_only() {
    let net = Network::new();
    let alice = net.add_node();
    let stranger = net.add_node();
    let friend = net.add_node();
    let (circle, _) = befriend(&alice, "alice", &friend, "friend").await;
    let public = public_circle(&alice).await;

    alice
        .create_post("hello world", 3, &[public.id])
        .await
        .expect("post");
    alice
        .create_post("friends only", 3, &[circle.id])
        .await
        .expect("post");
    alice
        .set_profile("name", "Alice", &[public.id])
        .await
        .expect("profile");

    let reply = stranger
        .dial(alice.onion())
        .await
        .expect("dial")
        .pull(0, PULL_PAYLOAD_LIMIT)
        .await
        .expect("pull");

    assert_eq!(reply.posts.len(), 1);
    assert_eq!(reply.posts[0].message, "hello world");
    assert_eq!(&reply.posts[0].originator, alice.onion());
    assert_eq!(reply.profiles.len(), 1);
}

#[tokio::test]
async fn test_trigger_before_auth_gets_no_reply() {
    let net = Network::new();
    let alice = net.add_node();

    let (mut client, server) = duplex(64 * 1024);
    let served = tokio::spawn(serve_connection(Arc::clone(&alice), server));

    write_packet(&mut client, PacketType::Trigger, &[], T)
        .await
        .expect("write");
    let mut rest = Vec::new();
    tokio::time::timeout(T, client.read_to_end(&mut rest))
        .await
        .expect("closed")
        .expect("read");

    assert!(rest.is_empty());
    served.await.expect("server task");
}

#[tokio::test]
async fn test_out_of_state_packets_close_silently() {
    let net = Network::new();
    let alice = net.add_node();

    for packet_type in [
        PacketType::Response,
        PacketType::Success,
        PacketType::PushPost,
        PacketType::Challenge,
        PacketType::Invalid,
    ] {
        let (mut client, server) = duplex(64 * 1024);
        tokio::spawn(serve_connection(Arc::clone(&alice), server));
        write_packet(&mut client, packet_type, b"{}", T).await.expect("write");
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.expect("read");
        assert!(rest.is_empty(), "{:?} got a reply", packet_type);
    }
}

#[tokio::test]
async fn test_oversized_inbound_frame_closes() {
    let net = Network::new();
    let alice = net.add_node();

    let (mut client, server) = duplex(64 * 1024);
    tokio::spawn(serve_connection(Arc::clone(&alice), server));

    let payload = vec![b'1'; INBOUND_PAYLOAD_LIMIT as usize + 1];
    // The server may close before the payload is fully written.
    let _ = write_packet(&mut client, PacketType::Pull, &payload, T).await;
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_raw_pull_is_terminated_by_success() {
    let net = Network::new();
    let alice = net.add_node();
    let public = public_circle(&alice).await;
    alice.create_post("one", 2, &[public.id]).await.expect("post");
    alice.create_post("two", 2, &[public.id]).await.expect("post");

    let (mut client, server) = duplex(64 * 1024);
    tokio::spawn(serve_connection(Arc::clone(&alice), server));
    write_packet(&mut client, PacketType::Pull, &PullPayload::encode(0).expect("since"), T)
        .await
        .expect("write");

    let mut reader = FrameReader::inbound(INBOUND_PAYLOAD_LIMIT, T);
    let mut types = Vec::new();
    loop {
        let frame = reader.read_frame(&mut client).await.expect("frame");
        types.push(frame.packet_type());
        if frame.packet_type() == PacketType::Success {
            break;
        }
    }
    assert_eq!(
        types,
        vec![PacketType::PushPost, PacketType::PushPost, PacketType::Success]
    );

    // One exchange per connection.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.expect("read");
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_ttl_decrements_per_hop() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let public = public_circle(&alice).await;
    let (post, _) = alice.create_post("travels", 3, &[public.id]).await.expect("post");
    let (dead, _) = alice.create_post("expired", 0, &[public.id]).await.expect("post");
    befriend(&alice, "alice", &bob, "bob").await;

    let alice_at_bob = contact(&bob, alice.onion()).await;
    bob.sync_contact(&alice_at_bob).await.expect("sync");

    let store = bob.store().lock().await;
    let copy = store.post_by_hash(&post.hash).expect("query").expect("stored");
    assert_eq!(copy.ttl, 2);
    assert!(!copy.published);
    assert!(store.post_by_hash(&dead.hash).expect("query").is_none());
}

#[tokio::test]
async fn test_repeated_sync_stores_one_row() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let public = public_circle(&alice).await;
    alice.create_post("once", 3, &[public.id]).await.expect("post");
    befriend(&alice, "alice", &bob, "bob").await;

    let alice_at_bob = contact(&bob, alice.onion()).await;
    let first = bob.sync_contact(&alice_at_bob).await.expect("sync");
    assert_eq!(first.posts, 1);

    // Pull from scratch again by going through the client directly.
    let again = bob
        .dial_authenticated(alice.onion())
        .await
        .expect("auth")
        .pull(0, PULL_PAYLOAD_LIMIT)
        .await
        .expect("pull");
    let stored = bob
        .store()
        .lock()
        .await
        .merge_pull(alice.onion(), &again.posts, &again.profiles)
        .expect("merge");
    assert_eq!(stored.len(), 1);

    let store = bob.store().lock().await;
    assert_eq!(store.posts_visible_to(None, 0).expect("q").len(), 0);
    assert_eq!(stored[0].id, store.post_by_hash(&stored[0].hash).expect("q").expect("row").id);
}

#[tokio::test]
async fn test_trigger_causes_pull_back() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let (circle, _) = befriend(&alice, "alice", &bob, "bob").await;

    let (post, handle) = alice.create_post("news", 3, &[circle.id]).await.expect("post");
    assert_eq!(handle.await.expect("join"), 1);

    let hash = post.hash.clone();
    let bob2 = Arc::clone(&bob);
    assert!(
        eventually(|| {
            let bob = Arc::clone(&bob2);
            let hash = hash.clone();
            async move { bob.store().lock().await.post_by_hash(&hash).expect("q").is_some() }
        })
        .await
    );
}

#[tokio::test]
async fn test_trigger_to_unreachable_peer_is_not_counted() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let carol = net.add_node();
    befriend(&alice, "alice", &bob, "bob").await;
    befriend(&alice, "alice", &carol, "carol").await;
    net.remove(carol.onion());

    let public = public_circle(&alice).await;
    let (_, handle) = alice.create_post("hi all", 3, &[public.id]).await.expect("post");
    assert_eq!(handle.await.expect("join"), 1);
}

#[tokio::test]
async fn test_failed_auth_falls_back_to_public_pull() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let public = public_circle(&alice).await;
    let private = alice
        .store()
        .lock()
        .await
        .create_circle("inner", ssn_core::storage::CircleCreator::User)
        .expect("circle");
    alice.create_post("public", 3, &[public.id]).await.expect("post");
    alice.create_post("private", 3, &[private.id]).await.expect("post");

    // Bob knows Alice, Alice does not know Bob.
    let alice_at_bob = add_contact(&bob, &alice, "alice", ContactStatus::Success).await;

    let outcome = bob.sync_contact(&alice_at_bob).await.expect("sync");
    assert!(!outcome.authenticated);
    assert_eq!(outcome.posts, 1);
}

#[tokio::test]
async fn test_failed_auth_without_fallback_errors() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node_with(NodeConfig {
        allow_unauthenticated_fallback: false,
        ..test_config()
    });
    let alice_at_bob = add_contact(&bob, &alice, "alice", ContactStatus::Success).await;

    let err = bob.sync_contact(&alice_at_bob).await.err().expect("should fail");
    assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_comment_completes_remote_thread() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let (bob_circle, _) = befriend(&alice, "alice", &bob, "bob").await;

    let (post, handle) = alice
        .create_post("what do you think?", 3, &[bob_circle.id])
        .await
        .expect("post");
    handle.await.expect("join");

    let post_hash = post.hash.clone();
    let bob2 = Arc::clone(&bob);
    assert!(
        eventually(|| {
            let bob = Arc::clone(&bob2);
            let hash = post_hash.clone();
            async move { bob.store().lock().await.post_by_hash(&hash).expect("q").is_some() }
        })
        .await
    );

    let parent_at_bob = bob
        .store()
        .lock()
        .await
        .post_by_hash(&post.hash)
        .expect("q")
        .expect("stored");
    let (comment, handle) = bob
        .create_comment(parent_at_bob.id, "looks good", 3)
        .await
        .expect("comment");
    assert_eq!(&comment.originator, alice.onion());
    assert_eq!(handle.await.expect("join"), 1);

    // Alice binds the originator to the peer that served the comment.
    let comment_hash = ssn_core::storage::post_hash(
        &comment.message,
        &comment.author,
        bob.onion(),
        comment.posted_at,
        &comment.parent_hash,
    );
    let alice2 = Arc::clone(&alice);
    let hash_at_alice = comment_hash.clone();
    assert!(
        eventually(|| {
            let alice = Arc::clone(&alice2);
            let hash = hash_at_alice.clone();
            async move {
                let store = alice.store().lock().await;
                match store.post_by_hash(&hash).expect("q") {
                    Some(c) => c.published && !store.post_circles(c.id).expect("q").is_empty(),
                    None => false,
                }
            }
        })
        .await
    );

    let store = alice.store().lock().await;
    let stored = store.post_by_hash(&comment_hash).expect("q").expect("stored");
    assert_eq!(stored.parent_id, post.id);
    assert_eq!(&stored.author, bob.onion());
    assert_eq!(store.post_circles(stored.id).expect("q"), vec![bob_circle]);
}

#[tokio::test]
async fn test_scheduler_run_limit() {
    let net = Network::new();
    let alice = net.add_node();
    let bob = net.add_node();
    let public = public_circle(&alice).await;
    let (post, _) = alice.create_post("scheduled", 3, &[public.id]).await.expect("post");
    befriend(&alice, "alice", &bob, "bob").await;

    let scheduler = ResyncScheduler::start(Arc::clone(&bob), Duration::from_secs(3600), Some(1));
    assert_eq!(scheduler.join().await, 1);
    assert!(bob
        .store()
        .lock()
        .await
        .post_by_hash(&post.hash)
        .expect("q")
        .is_some());
}

#[tokio::test]
async fn test_scheduler_stop() {
    let net = Network::new();
    let bob = net.add_node();
    let scheduler = ResyncScheduler::start(Arc::clone(&bob), Duration::from_millis(20), None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!scheduler.is_finished());
    assert!(scheduler.stop().await >= 1);
}

#[tokio::test]
async fn test_resync_reports_unreachable_contacts() {
    let net = Network::new();
    let bob = net.add_node();
    let ghost = net.add_node();
    let blocked = net.add_node();
    add_contact(&bob, &ghost, "ghost", ContactStatus::Success).await;
    add_contact(&bob, &blocked, "blocked", ContactStatus::Blocked).await;
    net.remove(ghost.onion());

    let report = bob.resync_all().await.expect("resync");
    assert_eq!(report.contacts, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test]
async fn test_pending_contact_requested_even_when_pull_fails() {
    let net = Network::new();
    let alice = net.add_node();
    // Any post overflows this ceiling, so bob's pull always fails.
    let bob = net.add_node_with(NodeConfig {
        pull_payload_limit: 16,
        ..test_config()
    });

    let public = public_circle(&alice).await;
    alice
        .store()
        .lock()
        .await
        .create_local_post("too big for bob", 3, &[public.id])
        .expect("post");
    add_contact(&bob, &alice, "alice", ContactStatus::Pending).await;

    let report = bob.resync_all().await.expect("resync");
    assert_eq!(report.contacts, 1);
    assert_eq!(report.failed, 1);

    let stored = contact(&alice, bob.onion()).await;
    assert_eq!(stored.status, ContactStatus::Open);
}
