//! Request/response correlation. See [`transaction::Transaction`] for the
//! single in-scope transaction shape (unreliable client transaction).

pub mod key;
pub mod transaction;

pub use transaction::Transaction;
