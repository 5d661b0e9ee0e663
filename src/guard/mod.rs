pub mod actor_key;
pub mod counter_store;
pub mod middleware;
pub mod patterns;
pub mod rate_limiter;
pub mod sanitizer;
pub mod spam;

pub use actor_key::ActorKeyHasher;
pub use rate_limiter::RateLimiter;
pub use sanitizer::ContentSanitizer;
pub use spam::SpamDetector;
