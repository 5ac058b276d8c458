//! Table-name inference conventions.
//!
//! Foreign-key columns and polymorphic discriminator values only *suggest*
//! their target table. The conversion code existence-checks every derived
//! name and skips when no such table exists, so a convention is free to guess
//! and still fails closed.

/// Derives candidate table names from foreign-key columns and discriminator
/// values.
///
/// Implementations that cannot produce a sensible candidate should return the
/// best literal guess anyway; the caller's existence check turns a bad guess
/// into a skip, never into a write against the wrong table.
pub trait NamingConvention: Send + Sync {
    /// Candidate table referenced by a foreign-key column
    /// (`order_id` to `orders`).
    fn foreign_key_table(&self, column: &str) -> String;

    /// Candidate table denoted by a discriminator value
    /// (`LineItem` to `line_items`).
    fn discriminator_table(&self, value: &str) -> String;
}

/// The stock convention.
///
/// Foreign keys: strip a trailing `_id`, then pluralize. Discriminators:
/// snake-case the value (`::` namespace separators become `_`), then
/// pluralize. Pluralization covers the regular English forms: a consonant
/// followed by `y` becomes `ies`, endings in `s`, `x`, `z`, `ch` or `sh`
/// take `es`, everything else takes `s`. Schemas with irregular nouns need an
/// explicit mapping or their own convention.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConvention;

impl NamingConvention for DefaultConvention {
    fn foreign_key_table(&self, column: &str) -> String {
        let stem = column.strip_suffix("_id").unwrap_or(column);
        pluralize(stem)
    }

    fn discriminator_table(&self, value: &str) -> String {
        pluralize(&snake_case(value))
    }
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        let after_consonant = stem
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphabetic() && !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'));
        if after_consonant {
            return format!("{stem}ies");
        }
    }
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

fn snake_case(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == ':' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let boundary = match prev {
                // lowercase or digit before an uppercase starts a new word,
                // as does the last capital of an acronym run (HTTPServer)
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => {
                    chars.get(i + 1).is_some_and(|n| n.is_lowercase())
                }
                _ => false,
            };
            if boundary && !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
