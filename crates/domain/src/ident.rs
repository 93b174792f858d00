//! Time-sortable identifiers.
//!
//! Every session, message, part, and permission gets an ID whose
//! lexicographic order equals creation order: a fixed-width hex
//! millisecond timestamp followed by a fixed-width sequence counter.
//! A process-wide monotonic guard bumps the counter when the clock
//! ties or steps backwards, so IDs minted in a tight loop still sort.

use std::fmt;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// ID namespaces. The prefix is part of the stored string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Session,
    Message,
    Part,
    Permission,
}

impl Kind {
    fn prefix(self) -> &'static str {
        match self {
            Kind::Session => "ses",
            Kind::Message => "msg",
            Kind::Part => "prt",
            Kind::Permission => "per",
        }
    }
}

/// A minted identifier. Stored and transmitted as its string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

struct Clock {
    last_millis: u64,
    counter: u64,
}

static CLOCK: Mutex<Clock> = Mutex::new(Clock {
    last_millis: 0,
    counter: 0,
});

impl Id {
    pub fn session() -> Self {
        Self::mint(Kind::Session)
    }
    pub fn message() -> Self {
        Self::mint(Kind::Message)
    }
    pub fn part() -> Self {
        Self::mint(Kind::Part)
    }
    pub fn permission() -> Self {
        Self::mint(Kind::Permission)
    }

    /// Mint the next ID in a namespace.
    pub fn mint(kind: Kind) -> Self {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let (millis, counter) = {
            let mut clock = CLOCK.lock();
            if now > clock.last_millis {
                clock.last_millis = now;
                clock.counter = 0;
            } else {
                clock.counter += 1;
            }
            (clock.last_millis, clock.counter)
        };
        // Two random bytes keep IDs unique across processes sharing a
        // storage root; they sit after the counter so ordering within a
        // process is unaffected.
        let entropy: u16 = rand::thread_rng().gen();
        Self(format!(
            "{}_{millis:012x}{counter:06x}{entropy:04x}",
            kind.prefix()
        ))
    }

    /// Wrap an already-minted string (storage reads, wire input).
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace this ID belongs to, if the prefix is recognized.
    pub fn kind(&self) -> Option<Kind> {
        match self.0.split('_').next() {
            Some("ses") => Some(Kind::Session),
            Some("msg") => Some(Kind::Message),
            Some("prt") => Some(Kind::Part),
            Some("per") => Some(Kind::Permission),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_in_mint_order() {
        let ids: Vec<Id> = (0..500).map(|_| Id::part()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn prefix_matches_kind() {
        assert!(Id::session().as_str().starts_with("ses_"));
        assert!(Id::message().as_str().starts_with("msg_"));
        assert!(Id::part().as_str().starts_with("prt_"));
        assert!(Id::permission().as_str().starts_with("per_"));
        assert_eq!(Id::session().kind(), Some(Kind::Session));
    }

    #[test]
    fn ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(Id::message()));
        }
    }

    #[test]
    fn serde_is_transparent() {
        let id = Id::session();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
