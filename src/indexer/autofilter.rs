//! Auto-filter module.
//!
//! The auto-filter learns, per view, how often tokens appear in
//! messages included in the view and in messages excluded from it,
//! then scores new messages from their most telling tokens.

use log::{debug, trace};
use std::collections::HashMap;

use crate::view::{Result, ViewId, ViewStorage};

use super::{Section, Token};

/// Number of tokens taken on each side of 0.5 when scoring.
pub const SCORED_TOKENS: usize = 10;

/// Represents the outcome of a classification.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Verdict {
    /// Not enough included or excluded messages were learnt.
    Undecided,
    Match(f64),
    NoMatch(f64),
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }
}

fn slot(section: Section, included: bool) -> i64 {
    section.to_i64() * 2 + if included { 0 } else { 1 }
}

fn unslot(slot: i64) -> (Section, bool) {
    (Section::from_i64(slot / 2), slot % 2 == 0)
}

#[derive(Clone, Debug, Default)]
pub struct AutoFilter {
    included: u32,
    excluded: u32,
    included_tokens: HashMap<Token, u32>,
    excluded_tokens: HashMap<Token, u32>,
    dirty: bool,
}

impl AutoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the tables of a view. Views never trained get an empty
    /// filter.
    pub fn load(storage: &ViewStorage, view: ViewId) -> Result<Self> {
        let mut filter = Self::new();

        if let Some((included, excluded)) = storage.read_autofilter_counts(view)? {
            filter.included = included;
            filter.excluded = excluded;
        }

        for (slot, token, count) in storage.read_autofilter_tokens(view)? {
            let (section, included) = unslot(slot);
            let table = if included {
                &mut filter.included_tokens
            } else {
                &mut filter.excluded_tokens
            };
            table.insert((section, token), count);
        }

        debug!(
            "auto-filter of view {} loaded ({} included, {} excluded)",
            view, filter.included, filter.excluded
        );
        Ok(filter)
    }

    pub fn save(&mut self, storage: &mut ViewStorage, view: ViewId) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let included = self
            .included_tokens
            .iter()
            .map(|((section, token), count)| (slot(*section, true), token.as_str(), *count));
        let excluded = self
            .excluded_tokens
            .iter()
            .map(|((section, token), count)| (slot(*section, false), token.as_str(), *count));

        storage.write_autofilter(view, (self.included, self.excluded), included.chain(excluded))?;
        self.dirty = false;
        Ok(())
    }

    pub fn included(&self) -> u32 {
        self.included
    }

    pub fn excluded(&self) -> u32 {
        self.excluded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Learns the tokens of a message included in (or excluded from)
    /// the view.
    pub fn train(&mut self, tokens: &[Token], included: bool) {
        let table = if included {
            self.included += 1;
            &mut self.included_tokens
        } else {
            self.excluded += 1;
            &mut self.excluded_tokens
        };

        for token in tokens {
            *table.entry(token.clone()).or_default() += 1;
        }

        self.dirty = true;
        trace!("trained {} tokens (included: {})", tokens.len(), included);
    }

    /// Forgets a message learnt earlier.
    pub fn untrain(&mut self, tokens: &[Token], included: bool) {
        let table = if included {
            self.included = self.included.saturating_sub(1);
            &mut self.included_tokens
        } else {
            self.excluded = self.excluded.saturating_sub(1);
            &mut self.excluded_tokens
        };

        for token in tokens {
            if let Some(count) = table.get_mut(token) {
                *count = count.saturating_sub(1);
            }
        }

        self.dirty = true;
    }

    /// Gets the probability that a message containing the token
    /// belongs to the view.
    fn token_value(&self, token: &Token) -> f64 {
        let times_included = self.included_tokens.get(token).copied().unwrap_or(0) as f64;
        let times_excluded = self.excluded_tokens.get(token).copied().unwrap_or(0) as f64;

        let inc = times_included / self.included.max(1) as f64;
        let exc = times_excluded / self.excluded.max(1) as f64;

        (inc + 0.000_01) / (inc + exc + 0.000_02)
    }

    /// Scores a message from its ten highest tokens above 0.5 and its
    /// ten lowest tokens below 0.5.
    pub fn score(&self, tokens: &[Token]) -> f64 {
        let mut high = vec![];
        let mut low = vec![];
        for token in tokens {
            let value = self.token_value(token);
            if value > 0.5 {
                high.push(value);
            } else if value < 0.5 {
                low.push(value);
            }
        }

        high.sort_by(|a, b| b.total_cmp(a));
        low.sort_by(|a, b| a.total_cmp(b));

        let mut positive = 1.0;
        let mut negative = 1.0;
        for value in high
            .into_iter()
            .take(SCORED_TOKENS)
            .chain(low.into_iter().take(SCORED_TOKENS))
        {
            positive *= value;
            negative *= 1.0 - value;
        }

        if positive + negative == 0.0 {
            return 0.5;
        }
        positive / (positive + negative)
    }

    /// Classifies a message. Filters which learnt fewer than `min`
    /// included or excluded messages stay undecided.
    pub fn classify(&self, tokens: &[Token], min: usize, threshold: f64) -> Verdict {
        if (self.included as usize) < min || (self.excluded as usize) < min {
            return Verdict::Undecided;
        }

        let score = self.score(tokens);
        if score > threshold {
            Verdict::Match(score)
        } else {
            Verdict::NoMatch(score)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<Token> {
        words
            .iter()
            .map(|word| (Section::Headers, word.to_string()))
            .collect()
    }

    #[test]
    fn untrained_filter_is_undecided() {
        let filter = AutoFilter::new();
        assert_eq!(
            Verdict::Undecided,
            filter.classify(&tokens(&["viagra"]), 30, 0.995)
        );
        assert_eq!(0.5, filter.score(&tokens(&["viagra"])));
    }

    #[test]
    fn trained_filter_separates_tokens() {
        let mut filter = AutoFilter::new();
        for _ in 0..40 {
            filter.train(&tokens(&["cheap", "pills", "offer"]), true);
            filter.train(&tokens(&["meeting", "agenda", "notes"]), false);
        }

        assert!(filter
            .classify(&tokens(&["cheap", "pills"]), 30, 0.995)
            .is_match());
        assert!(!filter
            .classify(&tokens(&["meeting", "notes"]), 30, 0.995)
            .is_match());
    }

    #[test]
    fn token_odds_use_message_counts() {
        let mut filter = AutoFilter::new();
        for _ in 0..40 {
            filter.train(&tokens(&["common", "pills"]), true);
        }
        for _ in 0..10 {
            filter.train(&tokens(&["common", "agenda"]), false);
        }

        let common = (Section::Headers, "common".to_owned());
        assert!((filter.token_value(&common) - 0.5).abs() < 1e-9);
        let pills = (Section::Headers, "pills".to_owned());
        assert!(filter.token_value(&pills) > 0.999_9);
    }

    #[test]
    fn slots_round_trip() {
        for section in [Section::Headers, Section::Body] {
            for included in [true, false] {
                assert_eq!((section, included), unslot(slot(section, included)));
            }
        }
    }
}
