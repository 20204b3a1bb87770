#![no_main]

use libfuzzer_sys::fuzz_target;
use localretrieve::{CollectionId, NewDocument};

fuzz_target!(|data: &str| {
    let _ = serde_json::from_str::<NewDocument>(data);
    let _ = serde_json::from_str::<CollectionId>(data);
});
