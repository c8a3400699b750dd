//! The unreliable client transaction: a single outbound request awaiting
//! a final response. Retransmission and the full RFC 3261 timer ladder
//! (Timer A/B/D/G/K, INVITE server transaction) are out of scope; this
//! keeps only what correlating a request with its response needs.

use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::message::Message;
use crate::peer::Peer;
use crate::transaction::key::TransactionKey;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// A single outbound request and the future completing when its final
/// response arrives.
pub struct Transaction {
    pub key: TransactionKey,
    pub original: Message,
    state: Mutex<TransactionState>,
    completion: Mutex<Option<oneshot::Sender<Result<Message>>>>,
}

impl Transaction {
    pub fn new(original: Message) -> Result<(Self, oneshot::Receiver<Result<Message>>)> {
        let method = original.cseq_method()?;
        let cseq = original.cseq()?;
        let (tx, rx) = oneshot::channel();
        Ok((
            Self {
                key: TransactionKey::new(method, cseq),
                original,
                state: Mutex::new(TransactionState::Trying),
                completion: Mutex::new(Some(tx)),
            },
            rx,
        ))
    }

    /// Sends the original request via `peer` and awaits the final
    /// response on `rx`, bounded by `timeout` if given.
    pub async fn start(
        &self,
        peer: &dyn Peer,
        rx: oneshot::Receiver<Result<Message>>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Message> {
        peer.send_message(&self.original).await?;
        {
            *self.state.lock().expect("transaction state lock poisoned") = TransactionState::Trying;
        }

        let outcome = match timeout {
            Some(dur) => tokio::time::timeout(dur, rx)
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|_| Error::Closed),
            None => rx.await.map_err(|_| Error::Closed),
        };

        *self.state.lock().expect("transaction state lock poisoned") = TransactionState::Terminated;
        outcome.unwrap_or(Err(Error::Closed))
    }

    /// Feeds a received message into the waiting future. Provisional
    /// (1xx) responses update state but do not complete the future.
    pub fn receive(&self, msg: Message) {
        if msg.is_provisional() {
            *self.state.lock().expect("transaction state lock poisoned") = TransactionState::Proceeding;
            debug!(key = %self.key, status = msg.status_code, "provisional response, transaction still pending");
            return;
        }

        let mut state = self.state.lock().expect("transaction state lock poisoned");
        if *state == TransactionState::Terminated || *state == TransactionState::Completed {
            debug!(key = %self.key, "dropping response for already-completed transaction");
            return;
        }
        *state = TransactionState::Completed;
        drop(state);

        if let Some(tx) = self.completion.lock().expect("transaction completion lock poisoned").take() {
            let _ = tx.send(Ok(msg));
        }
    }

    /// Completes the transaction with an error (connection loss, dialog
    /// closure, etc.) instead of a response.
    pub fn error(&self, err: Error) {
        *self.state.lock().expect("transaction state lock poisoned") = TransactionState::Terminated;
        if let Some(tx) = self.completion.lock().expect("transaction completion lock poisoned").take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Cancels the transaction: any caller awaiting its response
    /// receives [`Error::Closed`].
    pub fn close(&self) {
        self.error(Error::Closed);
    }

    pub fn is_terminated(&self) -> bool {
        *self.state.lock().expect("transaction state lock poisoned") == TransactionState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ChannelPeer;

    fn sample_request() -> Message {
        let mut req = Message::request(rsip::Method::Register, "sip:registrar.example.com".try_into().unwrap());
        req.set_cseq(1, rsip::Method::Register);
        req
    }

    #[tokio::test]
    async fn completes_on_final_response() {
        let (peer, _rx) = ChannelPeer::new();
        let (txn, rx) = Transaction::new(sample_request()).unwrap();
        let response = Message::response_from_request(&txn.original, 200, None, None);
        txn.receive(response);
        let result = txn.start(&peer, rx, None).await.unwrap();
        assert_eq!(result.status_code, Some(200));
    }

    #[tokio::test]
    async fn provisional_does_not_complete() {
        let (peer, _rx) = ChannelPeer::new();
        let (txn, rx) = Transaction::new(sample_request()).unwrap();
        let trying = Message::response_from_request(&txn.original, 100, None, None);
        txn.receive(trying);
        let final_resp = Message::response_from_request(&txn.original, 200, None, None);
        txn.receive(final_resp);
        let result = txn.start(&peer, rx, None).await.unwrap();
        assert_eq!(result.status_code, Some(200));
    }

    #[tokio::test]
    async fn close_completes_waiter_with_closed_error() {
        let (peer, _rx) = ChannelPeer::new();
        let (txn, rx) = Transaction::new(sample_request()).unwrap();
        txn.close();
        let result = txn.start(&peer, rx, None).await;
        assert!(matches!(result, Err(Error::Closed)));
    }
}
