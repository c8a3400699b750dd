use std::sync::Arc;

use tracing::info;

use crate::dialog::authenticate::Credential;
use crate::dialog::dialog::Dialog;
use crate::dialog::DialogId;
use crate::message::Contact;
use crate::peer::Peer;
use crate::registry::DialogRegistry;
use crate::Result;

/// SIP registration client.
///
/// `Registration` wraps a REGISTER [`Dialog`] with the convenience calls
/// a user agent needs: send the initial registration, refresh it before
/// `Expires` runs out, and deregister. DNS resolution of the registrar
/// and NAT-aware contact construction are transport-layer concerns the
/// Peer contract owns in this crate and are not reproduced here. The
/// digest-challenge-retry loop lives generically on [`Dialog::request`],
/// so every method (not just REGISTER) benefits from it.
pub struct Registration {
    dialog: Dialog,
}

impl Registration {
    pub fn new(
        registry: Arc<DialogRegistry>,
        peer: Arc<dyn Peer>,
        local: Contact,
        registrar: Contact,
        contact: Contact,
        credential: Option<Credential>,
    ) -> Self {
        let dialog = Dialog::new_outbound(
            registry,
            peer,
            rsip::Method::Register,
            local,
            registrar,
            contact,
            None,
            credential,
            1,
        );
        Self { dialog }
    }

    pub fn id(&self) -> DialogId {
        self.dialog.id()
    }

    /// Sends the initial REGISTER (CSeq 1, the dialog's original message
    /// verbatim aside from `Expires`). On success, the dialog schedules
    /// its own refresh at `1.1 x expires` seconds via its `maybe_close`
    /// policy.
    pub async fn register(&self, expires: u32) -> Result<()> {
        let response = self.dialog.start(Some(expires), None).await?;
        self.dialog.inner.registry.insert(self.dialog.id()).await;
        self.dialog.maybe_close(&response);
        info!(dialog = %self.id(), expires, "registered");
        Ok(())
    }

    /// Re-registers with a fresh `Expires`, bumping CSeq (`Dialog::close_later`
    /// is always idempotent to call twice, so the rescheduled refresh
    /// doesn't need to worry about stacking).
    pub async fn refresh(&self, expires: u32) -> Result<()> {
        let response = self.dialog.refresh(expires).await?;
        self.dialog.maybe_close(&response);
        info!(dialog = %self.id(), expires, "refreshed registration");
        Ok(())
    }

    /// Deregisters (`Expires: 0`) and tears the dialog down.
    pub async fn unregister(&self) -> Result<()> {
        self.dialog.close(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ChannelPeer;
    use crate::registry::EndpointOption;

    #[tokio::test]
    async fn register_schedules_refresh_from_expires_header() {
        let (peer, mut rx) = ChannelPeer::new();
        let registry = DialogRegistry::new(EndpointOption::default());
        let local = Contact::new("sip:alice@example.com".try_into().unwrap());
        let registrar = Contact::new("sip:registrar.example.com".try_into().unwrap());
        let contact = Contact::new("sip:alice@192.168.1.10:5060".try_into().unwrap());

        let registration = Registration::new(registry, Arc::new(peer), local, registrar, contact, None);

        let handle = tokio::spawn(async move { registration.register(3600).await });

        let sent = rx.recv().await.expect("expected outbound REGISTER");
        assert_eq!(sent.method, Some(rsip::Method::Register));

        // Without a peer response the registration would hang; this test
        // only exercises request construction, so we drop the handle.
        handle.abort();
    }
}
