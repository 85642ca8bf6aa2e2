//! Interning of canonical watch keys.
//!
//! Subscriptions are tracked by numeric id rather than by cloning cell keys
//! (name + full ancestor chain) into every index entry. Ids of keys nobody
//! subscribes to anymore are released and handed out again.

use std::collections::HashMap;

/// Numeric id of an interned watch key.
/// u32 keeps index entries small; four billion distinct keys is plenty.
pub type KeyId = u32;

/// Bidirectional table: canonical key string ↔ [`KeyId`].
///
/// # Example
/// ```
/// use witform_state_wasm::intern::KeyInterner;
///
/// let mut table = KeyInterner::new();
/// let a = table.intern("f1|field|items{7}/amount");
/// let b = table.intern("f1|field|items{7}/amount");
/// assert_eq!(a, b);
/// assert_eq!(table.resolve(a), Some("f1|field|items{7}/amount"));
/// ```
#[derive(Debug, Default)]
pub struct KeyInterner {
    /// Forward lookup, deduplicates repeated keys.
    key_to_id: HashMap<String, KeyId>,
    /// Reverse lookup; Vec index is the KeyId, `None` for a released slot.
    id_to_key: Vec<Option<String>>,
    /// Released ids, reused before the table grows.
    free: Vec<KeyId>,
}

impl KeyInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `key`, returning the existing id when it was seen before.
    pub fn intern(&mut self, key: &str) -> KeyId {
        if let Some(&id) = self.key_to_id.get(key) {
            return id;
        }
        let id = match self.free.pop() {
            Some(id) => {
                self.id_to_key[id as usize] = Some(key.to_owned());
                id
            }
            None => {
                self.id_to_key.push(Some(key.to_owned()));
                (self.id_to_key.len() - 1) as KeyId
            }
        };
        self.key_to_id.insert(key.to_owned(), id);
        id
    }

    /// Forget the key behind `id`. Unknown or already released ids are ignored.
    pub fn release(&mut self, id: KeyId) {
        if let Some(key) = self.id_to_key.get_mut(id as usize).and_then(Option::take) {
            self.key_to_id.remove(&key);
            self.free.push(id);
        }
    }

    /// Look up an id without interning. Keys nobody subscribed to have no id.
    pub fn get(&self, key: &str) -> Option<KeyId> {
        self.key_to_id.get(key).copied()
    }

    pub fn resolve(&self, id: KeyId) -> Option<&str> {
        self.id_to_key.get(id as usize)?.as_deref()
    }

    /// Number of live (unreleased) keys.
    pub fn count(&self) -> usize {
        self.key_to_id.len()
    }
}
