mod middleware;

pub use middleware::{Claims, CurrentUser, JwtVerifier, session_middleware};

#[cfg(test)]
pub(crate) use middleware::test_tokens;
