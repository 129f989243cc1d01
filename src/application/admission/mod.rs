pub mod client_identity;
pub mod rate_limiter;
