//! Bearer credential verification. Issuing credentials is handled elsewhere;
//! this service only turns an access token into a user id.

pub(crate) mod extractors;
pub mod jwt;

pub use extractors::AuthUser;
pub use jwt::{Claims, JwtKeys, TokenKind};
