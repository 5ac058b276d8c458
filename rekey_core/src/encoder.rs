//! Deterministic integer-to-UUID encoding.
//!
//! Pre-existing rows keep identities derived from their legacy integer keys:
//! the key's decimal digits become the tail of an otherwise-zero UUID, so `42`
//! maps to `00000000-0000-0000-0000-000000000042`. The same transform exists
//! as a SQL expression (see [`uuid_cast_sql`]), and the two must agree
//! bit-for-bit: a foreign key that still holds a coerced legacy integer is
//! matched against an already-converted primary key through this encoding.

use uuid::Uuid;

/// Maps a legacy integer identifier to its deterministic UUID.
///
/// Computed exactly as the expression from [`uuid_cast_sql`] computes it: the
/// decimal text of `id`, hyphens stripped, left-padded with zeros to the 32
/// hex characters of a UUID. Injective for `0 <= id < 10^12`, the range of
/// ordinary auto-increment keys. Larger inputs still produce the value the
/// SQL side produces, but their decimal digits no longer fit the final UUID
/// segment; together with negative inputs (whose sign is stripped like a
/// hyphen) they are outside the supported range. This is a known limitation,
/// not something the encoder papers over.
pub fn encode_legacy_id(id: i64) -> Uuid {
    let mut bits: u128 = 0;
    for b in id.to_string().bytes() {
        if b == b'-' {
            continue;
        }
        bits = (bits << 4) | u128::from(b - b'0');
    }
    Uuid::from_u128(bits)
}

/// The SQL-side twin of [`encode_legacy_id`], as an expression over `value`.
///
/// Renders `uuid(lpad(replace(<value>::text, '-', ''), 32, '0'))`: the value
/// as text, hyphens removed, left-padded to 32 hex characters, parsed as a
/// UUID. Over an integer column it yields the deterministic encoding; over a
/// column that already holds UUIDs it round-trips them unchanged, which is
/// what makes it usable in `ALTER COLUMN ... TYPE uuid USING`.
pub fn uuid_cast_sql(value: &str) -> String {
    format!("uuid(lpad(replace({value}::text, '-', ''), 32, '0'))")
}
