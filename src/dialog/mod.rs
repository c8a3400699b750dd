//! Dialog lifecycle, identity, and the INVITE client state machine.

pub mod authenticate;
pub mod dialog;
pub mod invitation;
pub mod invite_dialog;
pub mod registration;

#[cfg(test)]
mod tests;

pub use dialog::{Dialog, DialogInner};
pub use invite_dialog::{CallState, InviteDialog};

/// Dialog identity: the triple `{local_tag, remote_tag, call_id}`.
/// `remote_tag` is `None` until the first response/request supplies it,
/// at which point the dialog re-keys in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
}

impl DialogId {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, remote_tag: Option<String>) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag,
        }
    }

    pub fn with_remote_tag(&self, remote_tag: impl Into<String>) -> Self {
        Self {
            call_id: self.call_id.clone(),
            local_tag: self.local_tag.clone(),
            remote_tag: Some(remote_tag.into()),
        }
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{};local={};remote={}",
            self.call_id,
            self.local_tag,
            self.remote_tag.as_deref().unwrap_or("-")
        )
    }
}
