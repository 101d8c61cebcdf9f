use std::collections::BTreeMap;

/// Integer-valued endpoint option table, as written by current agents.
pub type IntOptionMap = BTreeMap<String, i64>;

/// Boolean-valued endpoint option table, the shape older data planes expect.
pub type BoolOptionMap = BTreeMap<String, bool>;

/// Converts an integer option table back to the boolean shape. A value of
/// 0 maps to false and 1 to true; keys with any other value have no
/// boolean equivalent and are dropped.
pub fn downgrade_options(opts: &IntOptionMap) -> BoolOptionMap {
    opts.iter()
        .filter_map(|(key, value)| match value {
            0 => Some((key.clone(), false)),
            1 => Some((key.clone(), true)),
            _ => None,
        })
        .collect()
}
