//! Comparator traits and the two implementations the engine ships with.
//!
//! A comparator is a pure total order over byte slices, fixed at
//! construction time. Its output is baked into the on-disk sort order, so
//! implementations must be stateless and deterministic.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::{
    extract_user_key, pack_sequence_and_type, INTERNAL_KEY_TRAILER, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};

/// A total order over byte slices, plus the key-shortening hooks the
/// table layer uses to build smaller index entries.
pub trait Comparator: Send + Sync {
    /// Three-way comparison.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Name of this ordering. Persisted in the manifest; an engine refuses
    /// to open a store whose comparator name does not match.
    fn name(&self) -> &'static str;

    /// If a short key in `[start, limit)` exists, overwrites `start` with
    /// it. A no-op fallback is always correct.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Overwrites `key` with a short key ordering at or after it.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &'static str {
        "eddykv.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        // find length of common prefix
        let min_len = start.len().min(limit.len());
        let mut diff = 0;
        while diff < min_len && start[diff] == limit[diff] {
            diff += 1;
        }

        if diff >= min_len {
            // one key is a prefix of the other; leave start alone
            return;
        }

        let byte = start[diff];
        if byte < 0xff && byte + 1 < limit[diff] {
            start[diff] = byte + 1;
            start.truncate(diff + 1);
            debug_assert_eq!(self.compare(start, limit), Ordering::Less);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        // bump the first byte that can be incremented, drop the rest
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // key is a run of 0xff; leave it as-is
    }
}

/// Orders internal keys: user key ascending (per the wrapped user
/// comparator), then sequence number descending, then type descending.
///
/// The descending trailer order is what makes a seek land on the newest
/// visible version first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> InternalKeyComparator {
        InternalKeyComparator { user }
    }

    /// The wrapped user-key comparator.
    #[must_use]
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let a_packed = coding::decode_fixed64(&a[a.len() - INTERNAL_KEY_TRAILER..]);
                let b_packed = coding::decode_fixed64(&b[b.len() - INTERNAL_KEY_TRAILER..]);
                // larger (seq, type) sorts first
                b_packed.cmp(&a_packed)
            }
            ord => ord,
        }
    }

    fn name(&self) -> &'static str {
        "eddykv.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start).to_vec();
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.clone();
        self.user.find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() < user_start.len() && self.user.compare(&user_start, &tmp) == Ordering::Less {
            // tmp is shorter than start and orders between start and limit;
            // tag it with the maximal trailer so it sorts before any real
            // entry for the same user key
            coding::put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &tmp), Ordering::Less);
            debug_assert_eq!(self.compare(&tmp, limit), Ordering::Less);
            *start = tmp;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key).to_vec();
        let mut tmp = user_key.clone();
        self.user.find_short_successor(&mut tmp);
        if tmp.len() < user_key.len() && self.user.compare(&user_key, &tmp) == Ordering::Less {
            coding::put_fixed64(
                &mut tmp,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &tmp), Ordering::Less);
            *key = tmp;
        }
    }
}

impl std::fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}
