//! Display names for new sessions.
//!
//! Names are drawn at random and are not reserved: two clients may end up
//! with the same one. They are presentational only; connections are keyed
//! by [`crate::ConnectionId`].

use rand::seq::SliceRandom;
use rand::Rng;

pub const ADJECTIVES: &[&str] = &[
    "happy",
    "funny",
    "serious",
    "delightful",
    "mysterious",
    "lovely",
    "charming",
    "friendly",
    "brave",
    "confident",
    "strong",
    "proud",
    "humble",
    "lucky",
    "rich",
];

pub const NOUNS: &[&str] = &[
    "dog",
    "cat",
    "mouse",
    "monkey",
    "giraffe",
    "rhinoceros",
    "ant",
    "bee",
    "train",
    "river",
    "mountain",
    "sun",
    "moon",
];

pub const SEPARATOR: &str = " ";

/// Pick a display name using the thread-local RNG.
pub fn assign() -> String {
    assign_with(&mut rand::thread_rng())
}

/// Pick a display name using `rng`.
pub fn assign_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    // Both vocabularies are non-empty constants, so the fallbacks never apply.
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("anonymous");
    let noun = NOUNS.choose(rng).copied().unwrap_or("guest");
    format!("{adjective}{SEPARATOR}{noun}")
}
