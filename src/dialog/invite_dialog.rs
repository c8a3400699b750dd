//! The INVITE client state machine. The transition table is modeled as
//! a pure function `(CallState, &Message) -> (CallState, Action)`.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::dialog::authenticate::Credential;
use crate::dialog::dialog::Dialog;
use crate::dialog::DialogId;
use crate::message::{Contact, Message};
use crate::peer::Peer;
use crate::registry::DialogRegistry;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Calling,
    Proceeding,
    Completed,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Ack,
    AckAndDeliver,
}

/// Pure transition function for the INVITE client state machine.
fn transition(state: CallState, msg: &Message) -> (CallState, Action) {
    let code = msg.status_code.unwrap_or(0);
    match state {
        CallState::Calling | CallState::Proceeding => {
            if (100..200).contains(&code) {
                (CallState::Proceeding, Action::None)
            } else if code == 200 {
                (CallState::Terminated, Action::AckAndDeliver)
            } else {
                (CallState::Completed, Action::AckAndDeliver)
            }
        }
        CallState::Completed => (CallState::Completed, Action::Ack),
        CallState::Terminated => (CallState::Terminated, Action::None),
    }
}

/// A dialog specialized for the INVITE state machine: `start()` sends
/// the initial INVITE directly via the Peer with no Transaction involved;
/// the Transaction abstraction is reserved for this dialog's own
/// BYE/CANCEL teardown and for the base Dialog's generic `request`.
pub struct InviteDialog {
    pub dialog: Dialog,
    state: Mutex<CallState>,
    ready: Mutex<Option<oneshot::Sender<Result<()>>>>,
    ready_rx: Mutex<Option<oneshot::Receiver<Result<()>>>>,
}

impl InviteDialog {
    pub fn new(
        registry: Arc<DialogRegistry>,
        peer: Arc<dyn Peer>,
        local: Contact,
        remote: Contact,
        contact: Contact,
        call_id: Option<String>,
        credential: Option<Credential>,
    ) -> Self {
        let dialog = Dialog::new_outbound(
            registry,
            peer,
            rsip::Method::Invite,
            local,
            remote,
            contact,
            call_id,
            credential,
            1,
        );
        let (tx, rx) = oneshot::channel();
        Self {
            dialog,
            state: Mutex::new(CallState::Calling),
            ready: Mutex::new(Some(tx)),
            ready_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn id(&self) -> DialogId {
        self.dialog.id()
    }

    pub fn state(&self) -> CallState {
        *self.state.lock().expect("invite state lock poisoned")
    }

    /// Sends the initial INVITE via the Peer. Does not await a response;
    /// call `ready()` for that.
    pub async fn start(&self) -> Result<()> {
        let original = self.dialog.inner.original_msg.lock().expect("original_msg lock poisoned").clone();
        self.dialog.inner.peer.send_message(&original).await?;
        self.dialog.inner.registry.insert(self.id()).await;
        info!(dialog = %self.id(), "invite dialog started");
        Ok(())
    }

    /// Single inbound dispatch entry point: routes responses and ACKs to
    /// `receive_response`, everything else to `receive_request`.
    pub async fn receive_message(&self, msg: Message) -> Result<()> {
        if msg.is_response() || msg.method == Some(rsip::Method::Ack) {
            self.receive_response(msg).await
        } else {
            self.receive_request(msg).await
        }
    }

    /// Inbound request handling: marks the dialog Terminated on BYE, then
    /// defers to the base dialog for remote-tag bookkeeping, enqueuing,
    /// and the close policy.
    pub async fn receive_request(&self, msg: Message) -> Result<()> {
        if msg.method == Some(rsip::Method::Bye) {
            *self.state.lock().expect("invite state lock poisoned") = CallState::Terminated;
        }
        self.dialog.receive_request(msg).await
    }

    /// Every incoming message is first enqueued to the inbound queue
    /// `recv()`/`wait_for_terminate()` observe, then dispatched by state.
    /// Once the call has reached Terminated, further responses (e.g. to
    /// the BYE `close()` sends) are routed through the base dialog's
    /// transaction lookup instead of the state machine, which has
    /// nothing left to transition.
    pub async fn receive_response(&self, msg: Message) -> Result<()> {
        self.dialog.enqueue_inbound(msg.clone());

        if self.state() == CallState::Terminated {
            return self.dialog.receive_response(msg).await;
        }

        let (next, action) = {
            let mut state = self.state.lock().expect("invite state lock poisoned");
            let (next, action) = transition(*state, &msg);
            *state = next;
            (next, action)
        };

        match action {
            Action::None => {}
            Action::Ack | Action::AckAndDeliver => {
                let ack = self.build_ack(&msg);
                self.dialog.inner.peer.send_message(&ack).await?;
            }
        }

        if action == Action::AckAndDeliver {
            let outcome = if msg.status_code == Some(200) {
                Ok(())
            } else {
                Err(Error::InviteFailed(msg.status_code.unwrap_or(0)))
            };
            if let Some(tx) = self.ready.lock().expect("ready lock poisoned").take() {
                let _ = tx.send(outcome);
            }
        }

        self.dialog.maybe_close(&msg);
        let _ = next;
        Ok(())
    }

    fn build_ack(&self, response: &Message) -> Message {
        let original = self.dialog.inner.original_msg.lock().expect("original_msg lock poisoned");
        let mut ack = Message::request(rsip::Method::Ack, original.request_uri.clone().unwrap());
        ack.headers.set("Call-ID", self.id().call_id);
        if let Ok(from) = original.from_details() {
            ack.set_from(&from);
        }
        if let Ok(to) = response.to_details() {
            ack.set_to(&to);
        } else if let Ok(to) = original.to_details() {
            ack.set_to(&to);
        }
        let cseq = original.cseq().unwrap_or(1);
        ack.set_cseq(cseq, rsip::Method::Ack);
        if let Some(via) = original.headers.get("Via") {
            for v in via.values() {
                ack.headers.append("Via", v.to_string());
            }
        }
        ack
    }

    /// Awaits the final outcome of the INVITE: resolves once on 200 OK,
    /// or fails with [`Error::InviteFailed`] for any other final
    /// response.
    pub async fn ready(&self) -> Result<()> {
        let rx = self.ready_rx.lock().expect("ready_rx lock poisoned").take();
        match rx {
            Some(rx) => rx.await.unwrap_or(Err(Error::Closed)),
            None => Err(Error::Closed),
        }
    }

    /// Idempotent: sends BYE if the call was established (Terminated
    /// meaning "200 OK seen and ACKed"), CANCEL otherwise, then tears
    /// down like any other dialog.
    pub async fn close(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        if self.dialog.is_closed() {
            return Ok(());
        }
        let state = self.state();
        match state {
            CallState::Terminated => {
                let _ = self.dialog.request(rsip::Method::Bye, &[], None, timeout).await;
            }
            CallState::Calling | CallState::Proceeding => {
                let _ = self.dialog.request(rsip::Method::Cancel, &[], None, timeout).await;
            }
            CallState::Completed => {}
        }
        self.dialog.close(true).await
    }

    /// Yields queued inbound messages until the `ready()` waiter has
    /// resolved and the queue drains.
    pub async fn wait_for_terminate(&self, timeout: std::time::Duration) {
        loop {
            match tokio::time::timeout(timeout, self.dialog.recv()).await {
                Ok(Some(_msg)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!(dialog = %self.id(), "wait_for_terminate timed out draining inbound queue");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calling_on_provisional_stays_proceeding() {
        let mut resp = Message::response(180, "Ringing");
        resp.set_cseq(1, rsip::Method::Invite);
        let (next, action) = transition(CallState::Calling, &resp);
        assert_eq!(next, CallState::Proceeding);
        assert_eq!(action, Action::None);
    }

    #[test]
    fn proceeding_on_200_terminates_and_delivers() {
        let mut resp = Message::response(200, "OK");
        resp.set_cseq(1, rsip::Method::Invite);
        let (next, action) = transition(CallState::Proceeding, &resp);
        assert_eq!(next, CallState::Terminated);
        assert_eq!(action, Action::AckAndDeliver);
    }

    #[test]
    fn calling_on_486_completes_and_delivers() {
        let mut resp = Message::response(486, "Busy Here");
        resp.set_cseq(1, rsip::Method::Invite);
        let (next, action) = transition(CallState::Calling, &resp);
        assert_eq!(next, CallState::Completed);
        assert_eq!(action, Action::AckAndDeliver);
    }

    #[test]
    fn completed_absorbs_duplicate_finals_with_ack_only() {
        let mut resp = Message::response(486, "Busy Here");
        resp.set_cseq(1, rsip::Method::Invite);
        let (next, action) = transition(CallState::Completed, &resp);
        assert_eq!(next, CallState::Completed);
        assert_eq!(action, Action::Ack);
    }
}
