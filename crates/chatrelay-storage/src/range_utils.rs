//! Range query helpers for prefix scans.

/// Calculate the exclusive end bound for a prefix range query.
///
/// Given prefix "stream-1:", returns "stream-1;" (next ASCII char after ':').
pub fn prefix_end_bound(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }

    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last = last.saturating_add(1);
    }

    String::from_utf8(bytes).unwrap_or_else(|_| format!("{}\x7F", prefix))
}

/// Frame key for `seq` within a stream. Zero-padded so keys sort numerically.
pub fn frame_key(stream_id: &str, seq: u64) -> String {
    format!("{}:{:020}", stream_id, seq)
}
