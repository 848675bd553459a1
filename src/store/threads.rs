//! Threads module.
//!
//! This module contains the helpers used to resolve thread parents and
//! to compare the denormalized string fields of a record.

use log::trace;
use std::cmp::Ordering;

/// Represents the string fields the store knows how to compare.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StringField {
    From,
    To,
    Subject,
    Other,
}

/// Strips leading quotes and angle brackets from an address.
pub fn strip_address(address: &str) -> &str {
    address.trim_start_matches(|c| c == '"' || c == '<')
}

/// Strips reply and forward decorations and mailing list tags from a
/// subject: everything up to the last `]` or `:` goes away.
pub fn strip_subject(subject: &str) -> &str {
    let cut = match (subject.rfind(']'), subject.rfind(':')) {
        (Some(a), Some(b)) => a.max(b) + 1,
        (Some(a), None) | (None, Some(a)) => a + 1,
        (None, None) => 0,
    };
    subject[cut..].trim_start()
}

fn compare_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Compares two string fields case insensitively, normalizing them
/// according to their type.
pub fn compare_strings(a: &str, b: &str, field: StringField, strip: bool) -> Ordering {
    match field {
        StringField::From | StringField::To => {
            compare_ignore_case(strip_address(a), strip_address(b))
        }
        StringField::Subject if strip => compare_ignore_case(strip_subject(a), strip_subject(b)),
        _ => compare_ignore_case(a, b),
    }
}

/// Normalizes a Message-ID: surrounding spaces and angle brackets are
/// not significant.
pub fn normalize_message_id(message_id: &str) -> &str {
    message_id.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Parses a References or In-Reply-To header into the list of
/// Message-IDs it contains, oldest first.
pub fn parse_references(header: &str) -> Vec<String> {
    if header.trim().is_empty() {
        return vec![];
    }

    match mailparse::msgidparse(header) {
        Ok(ids) if !ids.is_empty() => ids
            .iter()
            .map(|id| normalize_message_id(id).to_owned())
            .collect(),
        res => {
            trace!("cannot parse references {:?} ({:?}), splitting them", header, res.err());
            header
                .split_whitespace()
                .map(normalize_message_id)
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    #[test]
    fn strip_subject_decorations() {
        assert_eq!("Hello", strip_subject("Re: Hello"));
        assert_eq!("Hello", strip_subject("[list] Fwd: Hello"));
        assert_eq!("Hello", strip_subject("Hello"));
        assert_eq!("", strip_subject("Re:"));
    }

    #[test]
    fn compare_subjects() {
        assert_eq!(
            Ordering::Equal,
            compare_strings("Re: hello", "HELLO", StringField::Subject, true)
        );
        assert_ne!(
            Ordering::Equal,
            compare_strings("Re: hello", "HELLO", StringField::Subject, false)
        );
    }

    #[test]
    fn compare_addresses() {
        assert_eq!(
            Ordering::Equal,
            compare_strings("\"Alice", "alice", StringField::From, true)
        );
        assert_eq!(
            Ordering::Less,
            compare_strings("<alice@x>", "bob@x", StringField::To, true)
        );
    }

    #[test]
    fn references_are_normalized() {
        assert_eq!(
            vec!["a@x".to_owned(), "b@x".to_owned()],
            parse_references("<a@x> <b@x>")
        );
        assert!(parse_references("  ").is_empty());
    }
}
