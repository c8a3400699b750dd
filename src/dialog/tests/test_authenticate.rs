//! Dialog-level digest authentication: issuing a challenge and
//! validating the credentialed retry (the UAS side, complementing the
//! UAC-side retry covered in `test_dialog.rs`).

use std::sync::Arc;

use tracing_test::traced_test;

use crate::dialog::authenticate::{authorization_header, Authenticate, Credential};
use crate::dialog::dialog::Dialog;
use crate::message::Contact;
use crate::peer::ChannelPeer;
use crate::registry::{DialogRegistry, EndpointOption};

fn alice() -> Contact {
    Contact::new("sip:alice@example.com".try_into().unwrap())
}

fn bob() -> Contact {
    Contact::new("sip:bob@example.com".try_into().unwrap())
}

#[traced_test]
#[tokio::test]
async fn unauthorized_then_validate_auth_accepts_correct_credentials() {
    let registry = DialogRegistry::new(EndpointOption::default());
    let (peer, mut rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Register,
        bob(),
        alice(),
        bob(),
        None,
        None,
        1,
    );

    let request = dialog.inner.original_msg.lock().unwrap().clone();
    dialog.unauthorized(&request, "sip.example.com").await.unwrap();
    let challenge_resp = rx.recv().await.unwrap();
    assert_eq!(challenge_resp.status_code, Some(401));

    let raw = challenge_resp.headers.get_first("WWW-Authenticate").unwrap();
    let challenge = Authenticate::parse(raw).unwrap();
    let credential = Credential {
        username: request.from_details().unwrap().uri.to_string(),
        password: "secret".to_string(),
        realm: "sip.example.com".to_string(),
    };

    let mut retry = request.clone();
    let auth_header = authorization_header(&challenge, &credential, "REGISTER", &retry.request_uri.as_ref().unwrap().to_string());
    retry.headers.set("Authorization", auth_header);

    assert!(dialog.validate_auth(&retry, "secret").unwrap());
    assert!(logs_contain("issued digest challenge"));
}

#[tokio::test]
async fn validate_auth_rejects_wrong_password() {
    let registry = DialogRegistry::new(EndpointOption::default());
    let (peer, mut rx) = ChannelPeer::new();

    let dialog = Dialog::new_outbound(
        registry,
        Arc::new(peer),
        rsip::Method::Register,
        bob(),
        alice(),
        bob(),
        None,
        None,
        1,
    );

    let request = dialog.inner.original_msg.lock().unwrap().clone();
    dialog.unauthorized(&request, "sip.example.com").await.unwrap();
    let challenge_resp = rx.recv().await.unwrap();
    let raw = challenge_resp.headers.get_first("WWW-Authenticate").unwrap();
    let challenge = Authenticate::parse(raw).unwrap();

    let credential = Credential {
        username: request.from_details().unwrap().uri.to_string(),
        password: "wrong".to_string(),
        realm: "sip.example.com".to_string(),
    };
    let mut retry = request.clone();
    let auth_header = authorization_header(&challenge, &credential, "REGISTER", &retry.request_uri.as_ref().unwrap().to_string());
    retry.headers.set("Authorization", auth_header);

    assert!(!dialog.validate_auth(&retry, "secret").unwrap());
}
