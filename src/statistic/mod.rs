// Statistic definitions shared by the in-memory user model and every backend.

mod builtin;
mod registry;

pub use builtin::BuiltinStatistic;
pub use registry::{RegistryError, StatisticRegistry, StatisticRegistryBuilder, StatisticType};

/// Longest identifier accepted for table and statistic names.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Column names owned by the row layout itself; statistics may not reuse them.
pub const RESERVED_COLUMNS: [&str; 2] = ["uuid", "name"];

/// Lowercases and trims a statistic name so lookups are case-insensitive.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Returns true when `name` can be used verbatim as a quoted SQL identifier.
///
/// Only `[a-z_][a-z0-9_]*` is accepted so that statement text never depends
/// on anything a player can influence.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => {}
        _ => return false,
    }

    name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
