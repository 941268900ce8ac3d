use rand::seq::SliceRandom;
use rand::Rng;

const ROASTS: &[&str] = &[
    "Back again? It has barely been an hour.",
    "This app must be fascinating. You keep checking it.",
    "Your thumb knows the way here better than you do.",
    "Still nothing new in there. Promise.",
    "At this rate you should list it as a hobby.",
    "Remember what you opened your phone for? Neither do we.",
    "Five visits in an hour is a pattern, not an accident.",
    "The feed will survive without you for a while.",
];

/// One roast message, picked at random.
pub fn pick_roast<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    ROASTS.choose(rng).copied().unwrap_or(ROASTS[0])
}
