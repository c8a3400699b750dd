//! Client dialog tests
//!
//! Tests for client-side dialog behavior and state management.

use std::sync::Arc;

use crate::dialog::dialog::Dialog;
use crate::message::Contact;
use crate::peer::ChannelPeer;
use crate::registry::{DialogRegistry, EndpointOption};

fn create_test_registry() -> Arc<DialogRegistry> {
    DialogRegistry::new(EndpointOption::default())
}

fn alice() -> Contact {
    Contact::new("sip:alice@example.com".try_into().unwrap())
}

fn bob() -> Contact {
    Contact::new("sip:bob@example.com".try_into().unwrap())
}

#[tokio::test]
async fn client_dialog_creation_assigns_local_tag_and_uuid_call_id() {
    let registry = create_test_registry();
    let (peer, _rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Invite,
        alice(),
        bob(),
        alice(),
        None,
        None,
        1,
    );

    let id = dialog.id();
    assert!(!id.local_tag.is_empty());
    assert!(id.remote_tag.is_none());
    assert!(!id.call_id.is_empty());
}

#[tokio::test]
async fn cseq_increments_strictly_across_requests() {
    let registry = create_test_registry();
    let (peer, mut rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Register,
        alice(),
        bob(),
        alice(),
        None,
        None,
        1,
    );

    let d2 = dialog.clone();
    tokio::spawn(async move {
        let _ = d2.request(rsip::Method::Register, &[], None, None).await;
    });
    let first = rx.recv().await.unwrap();

    let d3 = dialog.clone();
    tokio::spawn(async move {
        let _ = d3.request(rsip::Method::Register, &[], None, None).await;
    });
    let second = rx.recv().await.unwrap();

    assert!(second.cseq().unwrap() > first.cseq().unwrap());
}

#[tokio::test]
async fn stray_ack_without_transaction_is_dropped_not_errored() {
    let registry = create_test_registry();
    let (peer, _rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Invite,
        alice(),
        bob(),
        alice(),
        None,
        None,
        1,
    );

    let mut ack = crate::message::Message::request(rsip::Method::Ack, "sip:bob@example.com".try_into().unwrap());
    ack.headers.set("Call-ID", dialog.id().call_id.clone());
    ack.set_from(&alice());
    ack.set_to(&bob());
    ack.set_cseq(99, rsip::Method::Ack);

    assert!(dialog.receive_response(ack).await.is_ok());
}

#[tokio::test]
async fn inbound_stream_yields_requests_in_order() {
    use futures::StreamExt;

    let registry = create_test_registry();
    let (peer, _rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Invite,
        alice(),
        bob(),
        alice(),
        None,
        None,
        1,
    );

    let mut notify = crate::message::Message::request(rsip::Method::Notify, "sip:alice@example.com".try_into().unwrap());
    notify.headers.set("Call-ID", dialog.id().call_id.clone());
    notify.set_from(&bob());
    notify.set_to(&alice());
    notify.set_cseq(1, rsip::Method::Notify);
    dialog.receive_request(notify).await.unwrap();

    let mut stream = Box::pin(dialog.inbound_stream());
    let first = stream.next().await.unwrap();
    assert_eq!(first.method, Some(rsip::Method::Notify));
}
