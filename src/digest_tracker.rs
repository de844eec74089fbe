//! Tracks how often each layer digest is seen across acquired images.
//!
//! This module provides [`DigestTracker`], which:
//! - Counts every layer observation (one per layer per image, duplicates included).
//! - Reports the digests seen more than once, i.e. layers shared between images.

use std::collections::HashMap;

use crate::digest::ContentDigest;

/// A layer seen more than once, with its observation count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedLayer {
    pub digest: ContentDigest,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DigestTracker {
    counts: HashMap<ContentDigest, usize>,
}

impl DigestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more occurrence of `digest`.
    pub fn observe(&mut self, digest: &ContentDigest) {
        *self.counts.entry(digest.clone()).or_insert(0) += 1;
    }

    /// Records every layer of one image, in order.
    pub fn observe_all<'a, I>(&mut self, digests: I)
    where
        I: IntoIterator<Item = &'a ContentDigest>,
    {
        for digest in digests {
            self.observe(digest);
        }
    }

    pub fn count(&self, digest: &ContentDigest) -> usize {
        self.counts.get(digest).copied().unwrap_or(0)
    }

    /// Number of distinct digests observed so far.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Layers with a count above one, sorted by digest so log output is stable.
    pub fn report(&self) -> Vec<RepeatedLayer> {
        let mut repeated: Vec<RepeatedLayer> = self
            .counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(digest, count)| RepeatedLayer {
                digest: digest.clone(),
                count: *count,
            })
            .collect();
        repeated.sort_by(|a, b| a.digest.cmp(&b.digest));
        repeated
    }
}
