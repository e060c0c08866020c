//! Connection credentials and the stateless session tokens that carry them.

pub mod codec;
pub mod credentials;

pub use codec::{SessionCodec, SessionToken};
pub use credentials::{ConnectionCredentials, TlsMode};
