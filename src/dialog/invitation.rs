use std::sync::Arc;

use tracing::info;

use crate::dialog::authenticate::Credential;
use crate::dialog::invite_dialog::InviteDialog;
use crate::dialog::DialogId;
use crate::message::Contact;
use crate::peer::Peer;
use crate::registry::DialogRegistry;
use crate::Result;

/// INVITE request options.
///
/// `InviteOption` bundles the parameters needed to establish a SIP
/// session: who is calling whom, the offered body (typically SDP, though
/// this crate treats it as an opaque payload since media negotiation is
/// out of scope), and optional credentials for a 401/407 challenge the
/// callee may issue.
///
/// # Examples
///
/// ```rust,no_run
/// # use sipcore::dialog::invitation::InviteOption;
/// # fn example() -> sipcore::Result<()> {
/// # let sdp_offer_bytes = vec![];
/// let invite_option = InviteOption {
///     caller: "sip:alice@example.com".try_into()?,
///     callee: "sip:bob@example.com".try_into()?,
///     offer: Some(sdp_offer_bytes),
///     contact: "sip:alice@192.168.1.100:5060".try_into()?,
///     credential: None,
/// };
/// # Ok(())
/// # }
/// ```
pub struct InviteOption {
    pub caller: rsip::Uri,
    pub callee: rsip::Uri,
    pub offer: Option<Vec<u8>>,
    pub contact: rsip::Uri,
    pub credential: Option<Credential>,
}

impl DialogRegistry {
    /// Creates a client INVITE dialog for `option` and sends the initial
    /// INVITE via `peer`.
    pub async fn do_invite(
        self: &Arc<Self>,
        option: InviteOption,
        peer: Arc<dyn Peer>,
    ) -> Result<Arc<InviteDialog>> {
        let local = Contact::new(option.caller);
        let remote = Contact::new(option.callee);
        let contact = Contact::new(option.contact);

        let invite_dialog = InviteDialog::new(
            self.clone(),
            peer,
            local,
            remote,
            contact,
            None,
            option.credential,
        );

        if let Some(offer) = option.offer {
            invite_dialog
                .dialog
                .inner
                .original_msg
                .lock()
                .expect("original_msg lock poisoned")
                .set_payload(offer);
        }

        let invite_dialog = Arc::new(invite_dialog);
        invite_dialog.start().await?;
        info!(dialog = %invite_dialog.id(), "sent initial invite");
        Ok(invite_dialog)
    }

    /// Awaits the outcome of a dialog previously created by `do_invite`.
    /// Confirms the call either way: `Ok(())` on 200 OK, `Err` carrying
    /// the final non-2xx status otherwise.
    pub async fn confirm_client_dialog(dialog: &InviteDialog) -> Result<DialogId> {
        dialog.ready().await?;
        Ok(dialog.id())
    }
}

