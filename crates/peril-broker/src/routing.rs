//! Routing key matching.
//!
//! Routing keys are dot-delimited words (`army_moves.alice`). Topic
//! bindings may use `*` for exactly one word and `#` for zero or more.

use peril_protocol::ExchangeKind;

/// Returns `true` if a message published with `routing_key` should reach
/// a queue bound with `binding_key` on an exchange of the given kind.
pub fn binding_matches(kind: ExchangeKind, binding_key: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => binding_key == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(binding_key, routing_key),
    }
}

/// Matches a topic pattern against a routing key.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` swallows 0..=len words.
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) if word == "*" || word == first => {
                match_words(rest, key_rest)
            }
            _ => false,
        },
    }
}
