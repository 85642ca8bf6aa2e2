//! Identity newtypes.
//!
//! Row ids and row indices are kept apart in the type system: a [`RowId`] is
//! the stable identity of a field-array row, a [`RowIndex`] is its current
//! display position and is only ever derived by looking the id up in the
//! owning field array's `row_ids` at read time.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use ts_rs::TS;

/// Opaque identity of one logical form instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(String);

impl FormId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random 26 character base-36 id, used when the caller does not pin one.
    pub fn generate() -> Self {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let id: String = (0..26)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Stable identity of a field-array row. Never encodes position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
pub struct RowId(pub u32);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current position of a row inside its field array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowIndex(pub usize);

/// Allocate a row id that is neither live in `existing` nor previously retired.
///
/// Draws at random and retries on collision.
pub fn new_row_id(existing: &[RowId], retired: &HashSet<RowId>) -> RowId {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = RowId(rng.gen());
        if !existing.contains(&candidate) && !retired.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_form_ids_differ() {
        let a = FormId::generate();
        let b = FormId::generate();
        assert_eq!(a.as_str().len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn new_row_id_avoids_existing_and_retired() {
        let existing: Vec<RowId> = (0..64).map(RowId).collect();
        let retired: HashSet<RowId> = (64..128).map(RowId).collect();
        for _ in 0..256 {
            let id = new_row_id(&existing, &retired);
            assert!(!existing.contains(&id));
            assert!(!retired.contains(&id));
        }
    }

    #[test]
    fn row_id_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&RowId(42)).unwrap(), "42");
        let id: RowId = serde_json::from_str("7").unwrap();
        assert_eq!(id, RowId(7));
    }
}
