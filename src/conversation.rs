pub const CHAT_ID_SEPARATOR: char = '_';

/// Canonical id for the unordered pair `(a, b)`: the two ids sorted and
/// joined with `_`. Anything reading the store directly has to apply the
/// same rule to find a conversation's records.
pub fn chat_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut id = String::with_capacity(first.len() + second.len() + 1);
    id.push_str(first);
    id.push(CHAT_ID_SEPARATOR);
    id.push_str(second);
    id
}

/// Both participants of a pair in stored (sorted) order.
pub fn sorted_pair(a: &str, b: &str) -> [String; 2] {
    if a <= b {
        [a.to_string(), b.to_string()]
    } else {
        [b.to_string(), a.to_string()]
    }
}
