mod claims;
mod jwt;

pub use claims::{AuthenticatedUser, Claims};
pub use jwt::{AuthError, JwtValidator, TokenValidator};
