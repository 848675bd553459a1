//! Tokenizer module.
//!
//! This module splits message texts into the tokens the auto-filter
//! learns from.

use std::collections::HashSet;

use crate::MessageRecord;

/// Characters separating tokens.
pub const SPACERS: &str = " =\r\n\t.,:;/()[]{}<>&?!-\"'`|@\\";
/// Longer tokens are ignored.
pub const MAX_TOKEN_LEN: usize = 30;
/// Maximum number of unique tokens taken from one message.
pub const MAX_TOKENS: usize = 200;

/// Represents the part of a message a token comes from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum Section {
    Headers,
    Body,
}

impl Section {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Headers => 0,
            Self::Body => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Body,
            _ => Self::Headers,
        }
    }
}

pub type Token = (Section, String);

/// Splits a text into lowercase tokens. Tokens are unique and kept in
/// order of first appearance.
pub fn tokenize(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = vec![];

    for token in text.split(|c| SPACERS.contains(c)) {
        if tokens.len() >= limit {
            break;
        }
        if token.is_empty() || token.chars().count() > MAX_TOKEN_LEN {
            continue;
        }

        let token = token.to_lowercase();
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }

    tokens
}

/// Tokenizes the cached headers and the body of a message, at most
/// [`MAX_TOKENS`] tokens in total.
pub fn message_tokens(record: &MessageRecord, body: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = tokenize(&record.header_text(), MAX_TOKENS)
        .into_iter()
        .map(|token| (Section::Headers, token))
        .collect();

    let left = MAX_TOKENS - tokens.len();
    tokens.extend(
        tokenize(body, left)
            .into_iter()
            .map(|token| (Section::Body, token)),
    );

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_spacers() {
        assert_eq!(
            vec!["hello", "world", "example", "com"],
            tokenize("Hello, world! <hello@example.com>", MAX_TOKENS)
        );
    }

    #[test]
    fn long_tokens_are_skipped() {
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert_eq!(vec!["short"], tokenize(&format!("{} short", long), MAX_TOKENS));
    }

    #[test]
    fn token_limit() {
        assert_eq!(2, tokenize("a b c d", 2).len());
        let text: Vec<String> = (0..500).map(|n| format!("t{}", n)).collect();
        let record = MessageRecord {
            subject: text.join(" "),
            ..MessageRecord::default()
        };
        assert_eq!(MAX_TOKENS, message_tokens(&record, "body words").len());
    }
}
