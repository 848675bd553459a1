//! View search module.
//!
//! This module contains the search descriptors attached to filter and
//! search views, and their compiled form used to match messages.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Represents the part of a message a search looks at.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub enum SearchField {
    /// From, To, Cc, Subject and the other cached headers together.
    #[default]
    CachedHeaders,
    CachedSubject,
    From,
    To,
    Cc,
    ReplyTo,
    Newsgroups,
    /// The raw header block.
    Headers,
    Body,
    EntireMessage,
}

impl SearchField {
    const ALL: [SearchField; 10] = [
        SearchField::CachedHeaders,
        SearchField::CachedSubject,
        SearchField::From,
        SearchField::To,
        SearchField::Cc,
        SearchField::ReplyTo,
        SearchField::Newsgroups,
        SearchField::Headers,
        SearchField::Body,
        SearchField::EntireMessage,
    ];

    /// Checks if the raw message is needed to get the searched text.
    pub fn needs_raw_message(self) -> bool {
        matches!(self, Self::Headers | Self::Body | Self::EntireMessage)
    }

    pub fn to_i64(self) -> i64 {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0) as i64
    }

    pub fn from_i64(value: i64) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .unwrap_or_default()
    }
}

/// Represents how a search combines with the previous one.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub enum SearchOperator {
    #[default]
    And,
    Or,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub enum SearchOption {
    /// The text appears as is, ignoring case.
    #[default]
    Exact,
    /// Any of the words appears. Words starting with `-` must not
    /// appear.
    AnyWord,
    DoesntContain,
    Regexp,
}

impl SearchOption {
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Exact => 0,
            Self::AnyWord => 1,
            Self::DoesntContain => 2,
            Self::Regexp => 3,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::AnyWord,
            2 => Self::DoesntContain,
            3 => Self::Regexp,
            _ => Self::Exact,
        }
    }
}

/// Represents a search rule.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Search {
    pub text: String,
    pub field: SearchField,
    pub operator: SearchOperator,
    pub option: SearchOption,
    /// Represents the oldest sent date matched, 0 for none.
    pub start_date: i64,
    /// Represents the newest sent date matched, 0 for none.
    pub end_date: i64,
}

impl Search {
    pub fn new<T: ToString>(text: T, field: SearchField, option: SearchOption) -> Self {
        Self {
            text: text.to_string(),
            field,
            option,
            ..Self::default()
        }
    }

    pub fn operator(mut self, operator: SearchOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn dates(mut self, start_date: i64, end_date: i64) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    /// Compiles the search. Fails only when a regular expression is
    /// malformed.
    pub fn compile(&self) -> Result<CompiledSearch, regex::Error> {
        let regex = match self.option {
            SearchOption::Regexp => Some(
                RegexBuilder::new(&self.text)
                    .case_insensitive(true)
                    .build()?,
            ),
            _ => None,
        };

        let mut words = vec![];
        let mut negations = vec![];
        if self.option == SearchOption::AnyWord {
            for word in self.text.split_whitespace() {
                match word.strip_prefix('-') {
                    Some(word) if !word.is_empty() => negations.push(word.to_lowercase()),
                    _ => words.push(word.to_lowercase()),
                }
            }
        }

        Ok(CompiledSearch {
            search: self.clone(),
            text: self.text.to_lowercase(),
            regex,
            words,
            negations,
        })
    }
}

/// Represents a search ready to be matched against messages.
#[derive(Clone, Debug)]
pub struct CompiledSearch {
    search: Search,
    text: String,
    regex: Option<Regex>,
    words: Vec<String>,
    negations: Vec<String>,
}

impl CompiledSearch {
    pub fn search(&self) -> &Search {
        &self.search
    }

    pub fn field(&self) -> SearchField {
        self.search.field
    }

    pub fn matches_date(&self, sent_time: i64) -> bool {
        (self.search.start_date == 0 || sent_time >= self.search.start_date)
            && (self.search.end_date == 0 || sent_time <= self.search.end_date)
    }

    pub fn matches_text(&self, text: &str) -> bool {
        match self.search.option {
            SearchOption::Regexp => self
                .regex
                .as_ref()
                .map(|regex| regex.is_match(text))
                .unwrap_or(false),
            SearchOption::Exact => text.to_lowercase().contains(&self.text),
            SearchOption::DoesntContain => !text.to_lowercase().contains(&self.text),
            SearchOption::AnyWord => {
                let text = text.to_lowercase();
                if self.negations.iter().any(|word| text.contains(word)) {
                    return false;
                }
                self.words.is_empty() || self.words.iter().any(|word| text.contains(word))
            }
        }
    }

    pub fn matches(&self, text: &str, sent_time: i64) -> bool {
        self.matches_date(sent_time) && self.matches_text(text)
    }
}

/// Evaluates a chain of searches from left to right, each one
/// combined with the result so far through its operator. The text of
/// a field is only fetched when a search needs it.
pub fn matches_chain<F>(searches: &[CompiledSearch], sent_time: i64, mut text_of: F) -> bool
where
    F: FnMut(SearchField) -> String,
{
    let mut result: Option<bool> = None;
    for search in searches {
        let res = match (result, search.search.operator) {
            (Some(false), SearchOperator::And) => false,
            (Some(true), SearchOperator::Or) => true,
            _ => search.matches(&text_of(search.field()), sent_time),
        };
        result = Some(res);
    }
    result.unwrap_or(false)
}

/// Compiles a chain of searches.
pub fn compile_all(searches: &[Search]) -> Result<Vec<CompiledSearch>, regex::Error> {
    searches.iter().map(Search::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_ignores_case() {
        let search = Search::new("Hello", SearchField::CachedSubject, SearchOption::Exact)
            .compile()
            .unwrap();
        assert!(search.matches_text("Re: hello world"));
        assert!(!search.matches_text("bye"));
    }

    #[test]
    fn any_word_with_negation() {
        let search = Search::new("rust go -java", SearchField::Body, SearchOption::AnyWord)
            .compile()
            .unwrap();
        assert!(search.matches_text("I like Rust"));
        assert!(!search.matches_text("rust and java"));
        assert!(!search.matches_text("python"));
    }

    #[test]
    fn malformed_regex_is_rejected() {
        let search = Search::new("(unclosed", SearchField::Body, SearchOption::Regexp);
        assert!(search.compile().is_err());
    }

    #[test]
    fn date_range() {
        let search = Search::new("", SearchField::CachedHeaders, SearchOption::Exact)
            .dates(100, 200)
            .compile()
            .unwrap();
        assert!(search.matches("x", 150));
        assert!(!search.matches("x", 99));
        assert!(!search.matches("x", 201));
    }

    #[test]
    fn chain_operators() {
        let searches = compile_all(&[
            Search::new("alice", SearchField::From, SearchOption::Exact),
            Search::new("urgent", SearchField::CachedSubject, SearchOption::Exact)
                .operator(SearchOperator::Or),
        ])
        .unwrap();

        let text_of = |from: &'static str, subject: &'static str| {
            move |field: SearchField| match field {
                SearchField::From => from.to_owned(),
                _ => subject.to_owned(),
            }
        };

        assert!(matches_chain(&searches, 0, text_of("bob", "URGENT: call")));
        assert!(matches_chain(&searches, 0, text_of("alice", "hi")));
        assert!(!matches_chain(&searches, 0, text_of("bob", "hi")));
        assert!(!matches_chain(&[], 0, text_of("bob", "hi")));
    }
}
