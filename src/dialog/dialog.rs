//! The base Dialog: identity, outbound request flow, auth challenge/
//! validation, timed auto-close, and inbound routing shared by every
//! dialog variant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::dialog::authenticate::{self, Authenticate, Credential};
use crate::dialog::DialogId;
use crate::message::{Contact, Message};
use crate::peer::Peer;
use crate::registry::DialogRegistry;
use crate::transaction::key::{make_branch, make_tag, TransactionKey};
use crate::transaction::Transaction;
use crate::{Error, Result};

/// Builds a `Via` header value for a request sent from `contact`'s
/// address over UDP, with a fresh per-request branch.
fn via_header(contact: &Contact, branch: &str) -> String {
    format!("SIP/2.0/UDP {};branch={}", contact.uri.host_with_port, branch)
}

/// Inner state shared by every handle to a dialog; `Dialog` (and
/// `InviteDialog`) clone the `Arc` around this rather than the state
/// itself.
pub struct DialogInner {
    pub id: Mutex<DialogId>,
    pub registry: Arc<DialogRegistry>,
    pub peer: Arc<dyn Peer>,
    pub original_msg: Mutex<Message>,
    pub method: rsip::Method,
    cseq: AtomicU32,
    transactions: Mutex<HashMap<TransactionKey, Arc<Transaction>>>,
    auth: Mutex<Option<Authenticate>>,
    pub credential: Option<Credential>,
    pub inbound: bool,
    closed: AtomicBool,
    closing_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
}

/// A handle to a dialog. Cloning a `Dialog` clones the handle, not the
/// conversation: all clones observe the same state through the shared
/// `Arc<DialogInner>`.
#[derive(Clone)]
pub struct Dialog {
    pub inner: Arc<DialogInner>,
}

impl Dialog {
    /// Constructs an outbound dialog and prepares (but does not send)
    /// its `original_msg`.
    pub fn new_outbound(
        registry: Arc<DialogRegistry>,
        peer: Arc<dyn Peer>,
        method: rsip::Method,
        local: Contact,
        remote: Contact,
        contact: Contact,
        call_id: Option<String>,
        credential: Option<Credential>,
        starting_cseq: u32,
    ) -> Self {
        let local_tag = local.tag().map(|t| t.to_string()).unwrap_or_else(make_tag);
        let mut local = local;
        local.set_tag(local_tag.clone());

        let call_id = call_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let id = DialogId::new(call_id.clone(), local_tag, None);

        let request_uri = remote.uri.clone();
        let mut original = Message::request(method.clone(), request_uri);
        original.headers.set("Call-ID", call_id);
        original.set_from(&local);
        original.set_to(&remote);
        original.set_contact(&contact);
        original.set_cseq(starting_cseq, method.clone());
        original.headers.set("Via", via_header(&contact, &make_branch()));

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(DialogInner {
                id: Mutex::new(id),
                registry,
                peer,
                original_msg: Mutex::new(original),
                method,
                cseq: AtomicU32::new(starting_cseq),
                transactions: Mutex::new(HashMap::new()),
                auth: Mutex::new(None),
                credential,
                inbound: false,
                closed: AtomicBool::new(false),
                closing_task: Mutex::new(None),
                inbound_tx,
                inbound_rx: AsyncMutex::new(inbound_rx),
            }),
        }
    }

    pub fn id(&self) -> DialogId {
        self.inner.id.lock().expect("dialog id lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Increments CSeq and builds an outbound request with the dialog's
    /// current From/To/Contact/Call-ID. `CANCEL` is the one exception:
    /// it must carry the exact CSeq of the request it cancels, so it
    /// reads the counter without advancing it.
    fn prepare_request(&self, method: rsip::Method, headers: &[(&str, &str)], payload: Option<Vec<u8>>) -> Message {
        let next_cseq = if method == rsip::Method::Cancel {
            self.inner.cseq.load(Ordering::SeqCst)
        } else {
            self.inner.cseq.fetch_add(1, Ordering::SeqCst) + 1
        };
        let original = self.inner.original_msg.lock().expect("original_msg lock poisoned");
        let id = self.inner.id.lock().expect("dialog id lock poisoned");

        let request_uri = original.request_uri.clone().expect("original request has a request-uri");
        let mut req = Message::request(method.clone(), request_uri);
        req.headers.set("Call-ID", id.call_id.clone());
        if let Ok(from) = original.from_details() {
            req.set_from(&from);
        }
        let mut to = original.to_details().unwrap_or_else(|_| Contact::new(req.request_uri.clone().unwrap()));
        if let Some(remote_tag) = &id.remote_tag {
            to.set_tag(remote_tag.clone());
        }
        req.set_to(&to);
        let local_contact = original.contact_details().ok().flatten();
        if let Some(contact) = &local_contact {
            req.set_contact(contact);
        }
        req.set_cseq(next_cseq, method.clone());

        if method == rsip::Method::Cancel {
            // CANCEL carries the exact branch of the request it cancels.
            if let Some(via) = original.headers.get("Via") {
                for v in via.values() {
                    req.headers.append("Via", v.to_string());
                }
            }
        } else {
            let branch = make_branch();
            let via = match &local_contact {
                Some(contact) => via_header(contact, &branch),
                None => format!("SIP/2.0/UDP 0.0.0.0;branch={}", branch),
            };
            req.headers.set("Via", via);
        }

        req.headers.set("User-Agent", self.inner.registry.defaults().user_agent.clone());
        for (name, value) in headers {
            req.headers.set(name, value.to_string());
        }
        if let Some(payload) = payload {
            req.set_payload(payload);
        }
        req
    }

    /// Issues a request and awaits its final response. ACK bypasses the
    /// transaction layer entirely (sent directly via the Peer).
    pub async fn request(
        &self,
        method: rsip::Method,
        headers: &[(&str, &str)],
        payload: Option<Vec<u8>>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Message> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let req = self.prepare_request(method.clone(), headers, payload.clone());

        if method == rsip::Method::Ack {
            self.inner.peer.send_message(&req).await?;
            return Ok(req);
        }

        let uri = req.request_uri.clone().map(|u| u.to_string()).unwrap_or_default();
        let response = self.send_via_transaction(req, timeout).await?;

        // Digest retry: one automatic retry with credentials on a 401/407.
        if matches!(response.status_code, Some(401) | Some(407)) {
            if let Some(credential) = self.inner.credential.clone() {
                let header_name = if response.status_code == Some(401) { "WWW-Authenticate" } else { "Proxy-Authenticate" };
                if let Some(raw) = response.headers.get_first(header_name) {
                    let challenge = authenticate::Authenticate::parse(raw)?;
                    let auth_header = authenticate::authorization_header(&challenge, &credential, method.to_string().as_str(), &uri);
                    let retry = self.prepare_request(method.clone(), headers, payload);
                    let mut retry = retry;
                    retry.headers.set("Authorization", auth_header);
                    let retried = self.send_via_transaction(retry, timeout).await?;
                    return if matches!(retried.status_code, Some(401) | Some(407)) {
                        Err(Error::AuthRejected)
                    } else {
                        Ok(retried)
                    };
                }
            }
        }

        Ok(response)
    }

    /// Sends the dialog's original request as its first transaction (no
    /// CSeq bump), optionally overriding `Expires` first. Used for the
    /// initial REGISTER/SUBSCRIBE/INVITE a dialog is built around.
    pub async fn start(&self, expires: Option<u32>, timeout: Option<std::time::Duration>) -> Result<Message> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let req = {
            let mut original = self.inner.original_msg.lock().expect("original_msg lock poisoned");
            if let Some(expires) = expires {
                original.headers.set("Expires", expires.to_string());
            }
            original.clone()
        };
        self.send_via_transaction(req, timeout).await
    }

    /// Sends a CANCEL directly via the Peer, without waiting for a
    /// response (unlike `request(Cancel, ...)`, which tracks the CANCEL
    /// as its own transaction).
    pub async fn cancel(&self) -> Result<()> {
        let cancel = self.prepare_request(rsip::Method::Cancel, &[], None);
        self.inner.peer.send_message(&cancel).await
    }

    /// Sends a NOTIFY, filling in the `Event`/`Content-Type`/
    /// `Subscription-State` defaults a dialog event notification needs
    /// unless `headers` already supplies them.
    pub async fn notify(
        &self,
        headers: &[(&str, &str)],
        payload: Option<Vec<u8>>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Message> {
        let has = |name: &str| headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name));
        let mut full_headers: Vec<(&str, &str)> = Vec::new();
        if !has("Event") {
            full_headers.push(("Event", "dialog"));
        }
        if !has("Content-Type") {
            full_headers.push(("Content-Type", "application/dialog-info+xml"));
        }
        if !has("Subscription-State") {
            full_headers.push(("Subscription-State", "active"));
        }
        full_headers.extend_from_slice(headers);
        self.request(rsip::Method::Notify, &full_headers, payload, timeout).await
    }

    /// Starts a transaction for `req` and awaits its final response.
    /// Rejects with [`Error::TransactionError`] if a transaction for the
    /// same `(method, cseq)` key is already in flight on this dialog.
    async fn send_via_transaction(&self, req: Message, timeout: Option<std::time::Duration>) -> Result<Message> {
        let (txn, rx) = Transaction::new(req)?;
        let txn = Arc::new(txn);
        {
            let mut transactions = self.inner.transactions.lock().expect("transactions lock poisoned");
            if transactions.contains_key(&txn.key) {
                return Err(Error::TransactionError("transaction already in flight".to_string(), txn.key.clone()));
            }
            transactions.insert(txn.key.clone(), txn.clone());
        }

        let result = txn.start(self.inner.peer.as_ref(), rx, timeout).await;
        self.inner.transactions.lock().expect("transactions lock poisoned").remove(&txn.key);
        result
    }

    /// Builds and sends a response to `request` via the Peer (no
    /// transaction involved on the responding side; this crate's in-scope
    /// surface is the client transaction).
    pub async fn reply(
        &self,
        request: &Message,
        status_code: u16,
        status_message: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> Result<()> {
        self.reply_with_headers(request, status_code, status_message, payload, &[], None, false).await
    }

    pub async fn reply_with_headers(
        &self,
        request: &Message,
        status_code: u16,
        status_message: Option<String>,
        payload: Option<Vec<u8>>,
        headers: &[(&str, &str)],
        contact_details: Option<&Contact>,
        compact: bool,
    ) -> Result<()> {
        let mut resp = Message::response_from_request(request, status_code, status_message, payload);
        if let Some(contact) = contact_details {
            resp.set_contact(contact);
        }
        resp.compact = compact;
        for (name, value) in headers {
            resp.headers.set(name, value.to_string());
        }
        self.inner.peer.send_message(&resp).await
    }

    /// Builds a 401 challenge, reusing the remembered one unless the
    /// request carries no credentials yet or none was issued before.
    pub async fn unauthorized(&self, request: &Message, realm: &str) -> Result<()> {
        let has_credentials = request.headers.get_first("Authorization").is_some();
        let mut auth = self.inner.auth.lock().expect("auth lock poisoned");
        if !has_credentials || auth.is_none() {
            *auth = Some(Authenticate::new(realm));
        }
        let header = auth.as_ref().expect("challenge set above").header_value();
        drop(auth);
        self.reply_with_headers(request, 401, None, None, &[("WWW-Authenticate", &header)], None, false).await?;
        debug!(call_id = %request.call_id().unwrap_or(""), header = %header, "issued digest challenge");
        Ok(())
    }

    /// Validates `message`'s `Authorization` header against the
    /// remembered challenge and `password`. `CANCEL` is always accepted.
    pub fn validate_auth(&self, message: &Message, password: &str) -> Result<bool> {
        let challenge = self.inner.auth.lock().expect("auth lock poisoned").clone();
        let challenge = match challenge {
            Some(c) => c,
            None => return Ok(false),
        };
        authenticate::validate_auth(message, &challenge, password)
    }

    /// Schedules `close()` after `delay`, cancelling any previously
    /// scheduled close first (Design Note "Dialog auto-close").
    pub fn close_later(self: &Dialog, delay: std::time::Duration) {
        let mut task = self.inner.closing_task.lock().expect("closing_task lock poisoned");
        if let Some(existing) = task.take() {
            existing.abort();
        }
        let dialog = self.clone();
        *task = Some(self.inner.registry.spawn_delayed(delay, async move {
            let _ = dialog.close(false).await;
        }));
    }

    /// Policy used by inbound messages to decide whether (and when) this
    /// dialog should schedule its own teardown.
    pub fn maybe_close(self: &Dialog, msg: &Message) {
        let method = msg.cseq_method().unwrap_or(rsip::Method::Invite);
        if method == rsip::Method::Notify {
            return;
        }
        if matches!(method, rsip::Method::Register | rsip::Method::Subscribe) {
            let expires = msg
                .headers
                .get_first("Expires")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            let delay = if expires == 0 {
                self.inner.registry.defaults().dialog_closing_delay
            } else {
                std::time::Duration::from_secs_f64(expires as f64 * 1.1)
            };
            self.close_later(delay);
            return;
        }
        self.close_later(self.inner.registry.defaults().dialog_closing_delay);
    }

    /// Idempotent teardown: for an outbound REGISTER/SUBSCRIBE, issues an
    /// `Expires: 0` refresh first unless `fast` skips it; cancels the
    /// pending timed close, closes all live transactions, and removes the
    /// dialog from the registry.
    pub async fn close(&self, fast: bool) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.inner.closing_task.lock().expect("closing_task lock poisoned").take() {
            task.abort();
        }

        if !fast && !self.inner.inbound && matches!(self.inner.method, rsip::Method::Register | rsip::Method::Subscribe) {
            let req = self.prepare_request(self.inner.method.clone(), &[("Expires", "0")], None);
            let _ = self.send_via_transaction(req, Some(std::time::Duration::from_secs(5))).await;
        }

        for (_, txn) in self.inner.transactions.lock().expect("transactions lock poisoned").drain() {
            if !txn.is_terminated() {
                debug!(key = %txn.key, "closing live transaction on dialog close");
            }
            txn.close();
        }

        let id = self.id();
        self.inner.registry.remove(&id).await;
        info!(dialog = %id, "dialog closed");
        Ok(())
    }

    /// Completes every live transaction with a connection-lost error
    /// without removing the dialog from the registry (the caller decides
    /// whether to also close it).
    pub fn connection_lost(&self) {
        for (_, txn) in self.inner.transactions.lock().expect("transactions lock poisoned").drain() {
            txn.error(Error::ConnectionLost);
        }
    }

    /// Re-keys on first response that supplies a remote tag, then routes
    /// the message to the matching transaction (ACKs without a match are
    /// silently dropped).
    pub async fn receive_response(&self, msg: Message) -> Result<()> {
        self.maybe_rekey(&msg).await?;

        let method = msg.cseq_method()?;
        let cseq = msg.cseq()?;
        let key = TransactionKey::new(method.clone(), cseq);

        let txn = self.inner.transactions.lock().expect("transactions lock poisoned").get(&key).cloned();
        match txn {
            Some(txn) => txn.receive(msg),
            None if method == rsip::Method::Ack => {
                debug!(key = %key, "dropping stray ack, no matching transaction");
            }
            None => {
                debug!(key = %key, "dropping response, no matching transaction");
            }
        }
        Ok(())
    }

    async fn maybe_rekey(&self, msg: &Message) -> Result<()> {
        let needs_rekey = {
            let id = self.inner.id.lock().expect("dialog id lock poisoned");
            id.remote_tag.is_none()
        };
        if !needs_rekey {
            return Ok(());
        }
        if let Some(remote_tag) = msg.to_details().ok().and_then(|c| c.tag().map(|t| t.to_string())) {
            let mut id = self.inner.id.lock().expect("dialog id lock poisoned");
            let old = id.clone();
            *id = id.with_remote_tag(remote_tag.clone());
            let new = id.clone();
            drop(id);
            self.inner.registry.rekey(&old, new).await;
        }
        Ok(())
    }

    /// Inbound request handling: remembers the remote tag if newly
    /// supplied (deleting the stale registry key, with no corresponding
    /// insert — unlike `receive_response`'s re-key), enqueues the message
    /// for `recv()`, and applies the close policy.
    pub async fn receive_request(self: &Dialog, msg: Message) -> Result<()> {
        let had_remote_tag = self.inner.id.lock().expect("dialog id lock poisoned").remote_tag.is_some();
        if !had_remote_tag {
            if let Some(remote_tag) = msg.from_details().ok().and_then(|c| c.tag().map(|t| t.to_string())) {
                let mut id = self.inner.id.lock().expect("dialog id lock poisoned");
                let old = id.clone();
                *id = id.with_remote_tag(remote_tag);
                drop(id);
                self.inner.registry.remove(&old).await;
            }
        }

        self.maybe_close(&msg);
        self.enqueue_inbound(msg);
        Ok(())
    }

    /// Pushes `msg` onto the user-visible inbound queue observed by
    /// `recv()`/`inbound_stream()`.
    pub(crate) fn enqueue_inbound(&self, msg: Message) {
        if self.inner.inbound_tx.send(msg).is_err() {
            warn!(dialog = %self.id(), "inbound queue closed, dropping message");
        }
    }

    /// Single inbound dispatch entry point: routes responses and ACKs to
    /// `receive_response`, everything else to `receive_request`.
    pub async fn receive_message(self: &Dialog, msg: Message) -> Result<()> {
        if msg.is_response() || msg.method == Some(rsip::Method::Ack) {
            self.receive_response(msg).await
        } else {
            self.receive_request(msg).await
        }
    }

    /// Re-issues `original_msg.method` with a fresh Expires (REGISTER and
    /// SUBSCRIBE refresh in this way).
    pub async fn refresh(&self, expires: u32) -> Result<Message> {
        let method = self.inner.method.clone();
        self.request(method, &[("Expires", &expires.to_string())], None, None).await
    }

    /// Awaits the next queued inbound message.
    pub async fn recv(&self) -> Option<Message> {
        self.inner.inbound_rx.lock().await.recv().await
    }

    /// `recv()` as an async stream, for callers that prefer `StreamExt`
    /// combinators over a manual `while let Some(msg) = ... .recv().await`
    /// loop. Ends when the dialog's inbound sender is dropped (i.e. on
    /// `close`).
    pub fn inbound_stream(&self) -> impl futures::Stream<Item = Message> + '_ {
        futures::stream::unfold(self, |dialog| async move { dialog.recv().await.map(|msg| (msg, dialog)) })
    }
}
