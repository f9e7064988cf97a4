//! Authentication adapters.
//!
//! Implementations of the `SessionValidator` port:
//!
//! - `jwt` - HS256 operator tokens (production)
//! - `mock` - fixed token map for tests

mod jwt;
mod mock;

pub use jwt::{JwtOperatorValidator, JwtValidatorConfig};
pub use mock::{MockSessionValidator, TEST_OPERATOR_ROLE};
