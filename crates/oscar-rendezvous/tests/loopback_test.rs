/// Integration test: two sessions on localhost, bridged by an in-process
/// ICBM relay, negotiate real TCP connections and move data.
mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use oscar_rendezvous::loopback::{self, LoopbackPeer};
use oscar_rendezvous::{Decision, RendezvousSession, SessionHandle, TcpTransport};
use oscar_types::{ConnectionMethod, RendezvousEvent};

use common::*;

struct Pair {
    alice: SessionHandle,
    alice_events: mpsc::UnboundedReceiver<RendezvousEvent>,
    bob: SessionHandle,
    bob_events: mpsc::UnboundedReceiver<RendezvousEvent>,
}

fn pair(tag: &str) -> Pair {
    let transport = Arc::new(TcpTransport);
    let (alice, alice_out, _) =
        RendezvousSession::spawn(config(&format!("alice_{tag}")), transport.clone());
    let (bob, bob_out, _) = RendezvousSession::spawn(config(&format!("bob_{tag}")), transport);

    loopback::bridge(
        LoopbackPeer {
            screen_name: "alice".into(),
            observed_ip: None,
            handle: alice.clone(),
            icbm: alice_out.icbm,
        },
        LoopbackPeer {
            screen_name: "bob".into(),
            observed_ip: None,
            handle: bob.clone(),
            icbm: bob_out.icbm,
        },
    );

    Pair {
        alice,
        alice_events: alice_out.events,
        bob,
        bob_events: bob_out.events,
    }
}

async fn event_within(rx: &mut mpsc::UnboundedReceiver<RendezvousEvent>) -> RendezvousEvent {
    tokio::time::timeout(Duration::from_secs(20), rx.recv())
        .await
        .expect("timed out")
        .expect("session closed")
}

async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<RendezvousEvent>) -> Vec<RendezvousEvent> {
    let mut seen = Vec::new();
    loop {
        let event = event_within(rx).await;
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn loopback_file_small() {
    loopback_file("small", 10 * 1024).await;
}

#[tokio::test]
async fn loopback_file_medium() {
    loopback_file("medium", 1024 * 1024).await;
}

#[tokio::test]
async fn loopback_file_empty() {
    loopback_file("empty", 0).await;
}

async fn loopback_file(tag: &str, size: usize) {
    init_tracing();
    let mut p = pair(tag);

    let dir = scratch_dir(&format!("loopback_{tag}"));
    let input = dir.join("input.bin");
    let output = dir.join("output.bin");
    let data = pattern(size);
    std::fs::write(&input, &data).unwrap();

    let cookie = p.alice.propose_send("bob", &input).await.unwrap();

    match event_within(&mut p.bob_events).await {
        RendezvousEvent::TransferRequested {
            cookie: c,
            peer,
            file,
        } => {
            assert_eq!(c, cookie);
            assert_eq!(peer, "alice");
            assert_eq!(file.name, "input.bin");
            assert_eq!(file.size, size as u64);
        }
        other => panic!("unexpected {other:?}"),
    }
    p.bob
        .respond(
            cookie,
            Decision::Accept {
                save_to: Some(output.clone()),
            },
        )
        .unwrap();

    let bob_seen = until_terminal(&mut p.bob_events).await;
    let alice_seen = until_terminal(&mut p.alice_events).await;

    for seen in [&bob_seen, &alice_seen] {
        assert!(seen.iter().any(|e| matches!(
            e,
            RendezvousEvent::Connected {
                method: ConnectionMethod::Direct,
                ..
            }
        )));
        assert!(matches!(seen.last(), Some(RendezvousEvent::Completed { .. })));
        assert!(seen.iter().all(|e| e.cookie() == cookie));
    }
    match bob_seen.last() {
        Some(RendezvousEvent::Completed { saved_to, .. }) => {
            assert_eq!(saved_to.as_deref(), Some(output.as_path()))
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn loopback_direct_im_with_image() {
    init_tracing();
    let mut p = pair("dim");

    let cookie = p.alice.propose_direct_im("bob").await.unwrap();
    match event_within(&mut p.bob_events).await {
        RendezvousEvent::DirectImRequested { cookie: c, peer } => {
            assert_eq!(c, cookie);
            assert_eq!(peer, "alice");
        }
        other => panic!("unexpected {other:?}"),
    }
    p.bob
        .respond(cookie, Decision::Accept { save_to: None })
        .unwrap();

    wait_for(&mut p.alice_events, |e| matches!(e, RendezvousEvent::Connected { .. })).await;
    wait_for(&mut p.bob_events, |e| matches!(e, RendezvousEvent::Connected { .. })).await;

    p.alice.add_image(1, "wave.gif", vec![0x47, 0x49, 0x46, 0x38]).unwrap();
    p.alice
        .send_im(cookie, "hello <IMG ID=\"1\"> there")
        .unwrap();

    match event_within(&mut p.bob_events).await {
        RendezvousEvent::DirectImReceived {
            peer, text, images, ..
        } => {
            assert_eq!(peer, "alice");
            assert!(text.starts_with("hello <IMG SRC=\"wave.gif\""));
            assert!(text.ends_with(" there"));
            assert_eq!(images.len(), 1);
            assert_eq!(images[0].id, 1);
            assert_eq!(images[0].name, "wave.gif");
            assert_eq!(images[0].data, vec![0x47, 0x49, 0x46, 0x38]);
        }
        other => panic!("unexpected {other:?}"),
    }

    p.bob.send_im(cookie, "hi back").unwrap();
    match event_within(&mut p.alice_events).await {
        RendezvousEvent::DirectImReceived { text, images, .. } => {
            assert_eq!(text, "hi back");
            assert!(images.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }

    // A body over the frame limit is dropped locally; the session survives.
    p.alice
        .add_image(2, "huge.bmp", vec![0; oscar_oft::ODC_MAX_PAYLOAD as usize])
        .unwrap();
    p.alice.send_im(cookie, "<IMG ID=\"2\">").unwrap();
    p.alice.remove_image(2).unwrap();
    p.alice.send_im(cookie, "still here").unwrap();
    match event_within(&mut p.bob_events).await {
        RendezvousEvent::DirectImReceived { text, images, .. } => {
            assert_eq!(text, "still here");
            assert!(images.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }

    p.alice.close(cookie).unwrap();
    assert!(matches!(
        event_within(&mut p.alice_events).await,
        RendezvousEvent::Completed { .. }
    ));
    assert!(matches!(
        event_within(&mut p.bob_events).await,
        RendezvousEvent::Completed { .. }
    ));
}

#[tokio::test]
async fn shutdown_cancels_live_transfers() {
    init_tracing();
    let mut p = pair("shutdown");

    let cookie = p.alice.propose_direct_im("bob").await.unwrap();
    event_within(&mut p.bob_events).await;

    p.alice.shutdown().unwrap();
    match wait_for(&mut p.alice_events, RendezvousEvent::is_terminal).await {
        RendezvousEvent::Failed { cookie: c, reason } => {
            assert_eq!(c, cookie);
            assert_eq!(reason, oscar_types::FailureReason::CancelledLocally);
        }
        other => panic!("unexpected {other:?}"),
    }
    match wait_for(&mut p.bob_events, RendezvousEvent::is_terminal).await {
        RendezvousEvent::Failed { reason, .. } => {
            assert_eq!(reason, oscar_types::FailureReason::CancelledByPeer)
        }
        other => panic!("unexpected {other:?}"),
    }
}
