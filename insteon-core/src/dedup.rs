//! Suppression of retransmitted copies of the same device message.

use std::collections::HashMap;
use std::time::Instant;

/// Recently seen message fingerprints of one device.
#[derive(Debug, Default)]
pub struct RecentMessages {
    seen: HashMap<String, Instant>,
}

impl RecentMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `fingerprint` was seen and has not expired yet.
    /// Otherwise records it with the given expiry.
    pub fn check_and_insert(
        &mut self,
        fingerprint: String,
        now: Instant,
        expires: Instant,
    ) -> bool {
        self.seen.retain(|_, expiry| *expiry >= now);
        if self.seen.contains_key(&fingerprint) {
            return true;
        }
        self.seen.insert(fingerprint, expires);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_duplicate_within_window() {
        let now = Instant::now();
        let mut recent = RecentMessages::new();
        let expires = now + Duration::from_millis(87);
        assert!(!recent.check_and_insert("AB".into(), now, expires));
        assert!(recent.check_and_insert("AB".into(), now + Duration::from_millis(50), expires));
        assert!(!recent.check_and_insert("CD".into(), now, expires));
    }

    #[test]
    fn test_expired_entry_is_forgotten() {
        let now = Instant::now();
        let mut recent = RecentMessages::new();
        assert!(!recent.check_and_insert("AB".into(), now, now + Duration::from_millis(87)));
        let later = now + Duration::from_millis(100);
        assert!(!recent.check_and_insert("AB".into(), later, later));
        assert_eq!(recent.len(), 1);
    }
}
