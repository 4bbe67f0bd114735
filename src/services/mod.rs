pub mod candidates;
pub mod enqueuer;
pub mod extractor;
pub mod fetcher;
pub mod rate_limiter;
pub mod verifier;
pub mod worker;

pub use candidates::*;
pub use enqueuer::*;
pub use extractor::*;
pub use fetcher::*;
pub use rate_limiter::*;
pub use verifier::*;
pub use worker::*;
