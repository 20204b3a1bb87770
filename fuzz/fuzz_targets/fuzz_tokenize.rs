#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let tokens = localretrieve::fts::tokenize(data);
    for token in &tokens {
        assert!(token.len() >= 2);
        assert!(token.chars().all(|c| c.is_alphanumeric()));
    }
});
