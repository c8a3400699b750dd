//! Transaction identity and random-token generation (tags, branches,
//! Call-IDs).

use rand::Rng;

const TOKEN_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..TOKEN_CHARS.len());
            TOKEN_CHARS[idx] as char
        })
        .collect()
}

/// A `From`/`To` tag, at least 8 characters.
pub fn make_tag() -> String {
    random_token(8)
}

/// A `Via` branch token, at least 10 characters, prefixed per RFC 3261's
/// magic cookie so it's recognizable as this agent's own branch.
pub fn make_branch() -> String {
    format!("z9hG4bK{}", random_token(10))
}

/// A digest-auth nonce, 10 characters.
pub fn make_nonce() -> String {
    random_token(10)
}

/// Flattened key identifying an in-flight transaction: the method of the
/// request and its CSeq number. Replaces the nested `method -> cseq`
/// table of the source with a single hashable key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionKey {
    pub method: rsip::Method,
    pub cseq: u32,
}

impl TransactionKey {
    pub fn new(method: rsip::Method, cseq: u32) -> Self {
        Self { method, cseq }
    }
}

impl std::hash::Hash for TransactionKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.method.to_string().hash(state);
        self.cseq.hash(state);
    }
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.method, self.cseq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_reasonably_unique() {
        let a = make_tag();
        let b = make_tag();
        assert_ne!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn branch_carries_magic_cookie_prefix() {
        assert!(make_branch().starts_with("z9hG4bK"));
    }
}
