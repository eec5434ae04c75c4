//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (at registry write time):
//!     context prefix + local pattern
//!     → pattern.rs (compile to Rule)
//!     → mapping.rs (new immutable HandlerMapping from deltas)
//!
//! Incoming request path:
//!     → HandlerMapping::best_match (servlet)
//!     → HandlerMapping::all_matches (filter chain)
//!     → Return: matched entry or None
//! ```
//!
//! # Design Decisions
//! - Rules compiled once at registration, immutable at runtime
//! - No regex in the hot path (exact, prefix and suffix comparisons only)
//! - Deterministic: same table and path always yield the same entry
//! - First match wins (entries pre-sorted by specificity, then priority)

pub mod mapping;
pub mod pattern;

pub use mapping::{HandlerMapping, MappingEntry};
pub use pattern::{all_matches, best_match, compile, compile_in, PatternError, Rule, RuleKind};
