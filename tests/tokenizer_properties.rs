//! Property-based tests for the shared tokenizer: whatever text goes in,
//! every token that comes out must satisfy the tokenizer's own stated
//! invariants.

use localretrieve::fts::tokenize;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_every_token_is_lowercase_alphanumeric_and_at_least_two_chars(text in ".*") {
        for token in tokenize(&text) {
            prop_assert!(token.len() >= 2);
            prop_assert!(token.chars().all(|c| c.is_alphanumeric()));
            prop_assert_eq!(&token, &token.to_lowercase());
        }
    }

    #[test]
    fn test_tokenizing_is_deterministic(text in ".*") {
        prop_assert_eq!(tokenize(&text), tokenize(&text));
    }

    #[test]
    fn test_token_count_never_exceeds_whitespace_split_count(text in "[a-zA-Z0-9 ]*") {
        let tokens = tokenize(&text);
        let naive_word_count = text.split_whitespace().count();
        prop_assert!(tokens.len() <= naive_word_count);
    }
}
