use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of a [`crate::RawData::id`], fixed by the wire format (`spec.md §3.1`).
const FETCH_ID_LEN: usize = 14;

/// Generates a fresh 14-character alphanumeric fetch id for log correlation.
pub fn new_fetch_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FETCH_ID_LEN)
        .map(char::from)
        .collect()
}
