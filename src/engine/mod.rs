// ============================================================================
// Matching Engine Module
// Matching algorithms, the per-book engine and its actor
// ============================================================================

pub mod book_actor;
pub mod factory;
pub mod matching_engine;
pub mod merchant;
pub mod otc;
pub mod standard;

pub use book_actor::{spawn_book, BookHandle};
pub use factory::{Matcher, MatchingEngineBuilder};
pub use matching_engine::{MatchingEngine, MatchingResult};
pub use merchant::MerchantMatching;
pub use otc::OtcMatching;
pub use standard::StandardMatching;
