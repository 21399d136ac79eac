/// Start/end marker pairing.
///
/// Walks chat messages once, in delivery order. A message containing the
/// start marker opens (or re-opens) a session for its author; a later message
/// from the same author containing the end marker closes it and credits the
/// elapsed seconds. Messages are assumed to arrive chronologically; a
/// negative gap is clamped to zero and logged rather than reordered.

use crate::youtube::ChatMessage;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::collections::HashMap;

/// Substrings that bound a study session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub start: String,
    pub end: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            start: "開始".into(),
            end: "終了".into(),
        }
    }
}

/// One matched start/end pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDuration {
    pub author: String,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: DateTime<FixedOffset>,
    pub seconds: f64,
}

/// Author → accumulated seconds.
///
/// Keys are unique. Iteration follows the order in which each author was
/// first added, which keeps tie-breaking in the ranking deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `seconds` to `author`, creating the entry at 0 if absent.
    pub fn add(&mut self, author: &str, seconds: f64) {
        match self.index.get(author) {
            Some(&i) => self.entries[i].1 += seconds,
            None => {
                self.index.insert(author.to_string(), self.entries.len());
                self.entries.push((author.to_string(), seconds));
            }
        }
    }

    /// Add every entry of `other` into `self`.
    pub fn merge(&mut self, other: &Totals) {
        for (author, seconds) in other.iter() {
            self.add(author, seconds);
        }
    }

    pub fn get(&self, author: &str) -> Option<f64> {
        self.index.get(author).map(|&i| self.entries[i].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(a, s)| (a.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, f64)> for Totals {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        let mut totals = Totals::new();
        for (author, seconds) in iter {
            totals.add(author, seconds);
        }
        totals
    }
}

/// Result of pairing one run's messages.
#[derive(Debug, Clone, Default)]
pub struct Pairing {
    /// Completed sessions, in the order their end marker arrived.
    pub sessions: Vec<SessionDuration>,
    /// Per-author sum of `sessions`.
    pub totals: Totals,
    /// Starts still open when the messages ran out (discarded).
    pub unmatched_starts: usize,
}

/// Pair start/end markers per author and sum the elapsed time.
pub fn aggregate(messages: &[ChatMessage], markers: &Markers) -> Pairing {
    let mut open: HashMap<&str, DateTime<FixedOffset>> = HashMap::new();
    let mut pairing = Pairing::default();

    for msg in messages {
        if msg.text.contains(markers.start.as_str()) {
            if open.insert(msg.author.as_str(), msg.timestamp).is_some() {
                log::debug!("Restarted open session for {}", msg.author);
            }
        } else if msg.text.contains(markers.end.as_str()) {
            let Some(started_at) = open.remove(msg.author.as_str()) else {
                log::debug!("End marker from {} with no open session, ignored", msg.author);
                continue;
            };
            let gap_ms = (msg.timestamp - started_at).num_milliseconds();
            if gap_ms < 0 {
                log::warn!(
                    "End before start for {} ({started_at} → {}), counting 0s",
                    msg.author,
                    msg.timestamp
                );
            }
            let seconds = gap_ms.max(0) as f64 / 1000.0;
            pairing.totals.add(&msg.author, seconds);
            pairing.sessions.push(SessionDuration {
                author: msg.author.clone(),
                started_at,
                ended_at: msg.timestamp,
                seconds,
            });
        }
    }

    pairing.unmatched_starts = open.len();
    if !open.is_empty() {
        log::info!("{} session(s) never ended, discarded", open.len());
    }
    pairing
}
