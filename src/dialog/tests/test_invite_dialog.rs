//! INVITE dialog scenarios: provisional happy path, 486 busy, and
//! CANCEL during Proceeding.

use std::sync::Arc;

use crate::dialog::invite_dialog::{CallState, InviteDialog};
use crate::message::{Contact, Message};
use crate::peer::ChannelPeer;
use crate::registry::{DialogRegistry, EndpointOption};
use crate::Error;

fn alice() -> Contact {
    Contact::new("sip:alice@example.com".try_into().unwrap())
}

fn bob() -> Contact {
    Contact::new("sip:bob@example.com".try_into().unwrap())
}

async fn started_invite() -> (Arc<InviteDialog>, tokio::sync::mpsc::UnboundedReceiver<Message>) {
    let registry = DialogRegistry::new(EndpointOption::default());
    let (peer, rx) = ChannelPeer::new();
    let invite = Arc::new(InviteDialog::new(registry, Arc::new(peer), alice(), bob(), alice(), None, None));
    invite.start().await.unwrap();
    (invite, rx)
}

#[tokio::test]
async fn invite_with_provisional_then_200_sends_exactly_one_ack() {
    let (invite, mut rx) = started_invite().await;
    let _initial_invite = rx.recv().await.unwrap();

    let original = invite.dialog.inner.original_msg.lock().unwrap().clone();

    let trying = Message::response_from_request(&original, 100, None, None);
    invite.receive_response(trying).await.unwrap();
    assert_eq!(invite.state(), CallState::Proceeding);

    let ringing = Message::response_from_request(&original, 180, None, None);
    invite.receive_response(ringing).await.unwrap();
    assert_eq!(invite.state(), CallState::Proceeding);

    let i2 = invite.clone();
    let ready_handle = tokio::spawn(async move { i2.ready().await });

    let ok = Message::response_from_request(&original, 200, None, None);
    invite.receive_response(ok).await.unwrap();

    let ack = rx.recv().await.unwrap();
    assert_eq!(ack.method, Some(rsip::Method::Ack));
    assert!(rx.try_recv().is_err());

    assert_eq!(invite.state(), CallState::Terminated);
    ready_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn invite_with_486_busy_completes_and_ready_fails() {
    let (invite, mut rx) = started_invite().await;
    let original = rx.recv().await.unwrap();

    let i2 = invite.clone();
    let ready_handle = tokio::spawn(async move { i2.ready().await });

    let busy = Message::response_from_request(&original, 486, None, None);
    invite.receive_response(busy).await.unwrap();

    let ack = rx.recv().await.unwrap();
    assert_eq!(ack.method, Some(rsip::Method::Ack));
    assert_eq!(invite.state(), CallState::Completed);

    let err = ready_handle.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::InviteFailed(486)));

    let duplicate = Message::response_from_request(&original, 486, None, None);
    invite.receive_response(duplicate).await.unwrap();
    let second_ack = rx.recv().await.unwrap();
    assert_eq!(second_ack.method, Some(rsip::Method::Ack));
    assert_eq!(invite.state(), CallState::Completed);
}

#[tokio::test]
async fn cancel_during_proceeding_sends_cancel_and_closes() {
    let (invite, mut rx) = started_invite().await;
    let original = rx.recv().await.unwrap();

    let ringing = Message::response_from_request(&original, 180, None, None);
    invite.receive_response(ringing).await.unwrap();
    assert_eq!(invite.state(), CallState::Proceeding);

    let i2 = invite.clone();
    let close_handle = tokio::spawn(async move { i2.close(None).await });

    let cancel = rx.recv().await.unwrap();
    assert_eq!(cancel.method, Some(rsip::Method::Cancel));

    let cancel_ok = Message::response_from_request(&cancel, 200, None, None);
    invite.dialog.receive_response(cancel_ok).await.unwrap();

    close_handle.await.unwrap().unwrap();
    assert!(invite.dialog.is_closed());
}

#[tokio::test]
async fn inbound_bye_terminates_an_established_call() {
    let (invite, mut rx) = started_invite().await;
    let original = rx.recv().await.unwrap();

    let ok = Message::response_from_request(&original, 200, None, None);
    invite.receive_response(ok).await.unwrap();
    let _ack = rx.recv().await.unwrap();
    assert_eq!(invite.state(), CallState::Terminated);
    let _queued_ok = invite.dialog.recv().await.unwrap();

    let mut bye = Message::request(rsip::Method::Bye, original.request_uri.clone().unwrap());
    bye.headers.set("Call-ID", invite.id().call_id.clone());
    bye.set_from(&bob());
    bye.set_to(&alice());
    bye.set_cseq(1, rsip::Method::Bye);

    invite.receive_message(bye).await.unwrap();
    assert_eq!(invite.state(), CallState::Terminated);

    let queued = invite.dialog.recv().await.unwrap();
    assert_eq!(queued.method, Some(rsip::Method::Bye));
}
