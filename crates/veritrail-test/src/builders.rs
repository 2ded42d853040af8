//! Builders for correctly sealed event chains.

use veritrail_crypto::ContentHash;
use veritrail_integrity::{AuditEvent, GENESIS_HASH, seal};

use crate::fixtures::test_event;

type Customizer = Box<dyn Fn(AuditEvent) -> AuditEvent + Send + Sync>;

/// Builds a run of consecutive events, each sealed to its predecessor.
///
/// ```rust,ignore
/// let chain = ChainBuilder::new(10)
///     .starting_at(101)
///     .after(previous_tail_hash)
///     .customize(|e| e.with_metadata("region", "eu"))
///     .build();
/// ```
pub struct ChainBuilder {
    len: u64,
    first: u64,
    previous: ContentHash,
    customize: Option<Customizer>,
}

impl ChainBuilder {
    /// A chain of `len` events starting at sequence 1 from genesis.
    #[must_use]
    pub fn new(len: u64) -> Self {
        Self {
            len,
            first: 1,
            previous: GENESIS_HASH,
            customize: None,
        }
    }

    /// Start the chain at `sequence` instead of 1.
    #[must_use]
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.first = sequence;
        self
    }

    /// Seal the first event to `previous` instead of genesis.
    #[must_use]
    pub fn after(mut self, previous: ContentHash) -> Self {
        self.previous = previous;
        self
    }

    /// Adjust every event before it is sealed.
    #[must_use]
    pub fn customize(
        mut self,
        f: impl Fn(AuditEvent) -> AuditEvent + Send + Sync + 'static,
    ) -> Self {
        self.customize = Some(Box::new(f));
        self
    }

    /// Build the sealed events, in sequence order.
    ///
    /// # Panics
    ///
    /// Panics if a customised event cannot be hashed.
    #[must_use]
    pub fn build(self) -> Vec<AuditEvent> {
        let mut previous = self.previous;
        let mut out = Vec::new();
        let mut sequence = self.first;
        for _ in 0..self.len {
            let mut event = test_event(sequence);
            if let Some(f) = &self.customize {
                event = f(event);
            }
            previous = seal(&mut event, previous).expect("test event must be hashable");
            out.push(event);
            sequence = sequence.saturating_add(1);
        }
        out
    }

    /// Content hash the next appended event would link to.
    #[must_use]
    pub fn tail_hash(events: &[AuditEvent]) -> ContentHash {
        events.last().map_or(GENESIS_HASH, |e| e.content_hash)
    }
}

impl std::fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("len", &self.len)
            .field("first", &self.first)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veritrail_integrity::compute_hash;

    #[test]
    fn test_chain_links_each_event_to_its_predecessor() {
        let chain = ChainBuilder::new(4).build();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0].previous_hash, GENESIS_HASH);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].content_hash);
            assert_eq!(pair[1].sequence, pair[0].sequence.saturating_add(1));
        }
        for event in &chain {
            assert_eq!(
                compute_hash(event, &event.previous_hash).unwrap(),
                event.content_hash
            );
        }
    }

    #[test]
    fn test_continuation_links_to_given_tail() {
        let head = ChainBuilder::new(3).build();
        let tail = ChainBuilder::new(2)
            .starting_at(4)
            .after(ChainBuilder::tail_hash(&head))
            .build();
        assert_eq!(tail[0].sequence, 4);
        assert_eq!(tail[0].previous_hash, head[2].content_hash);
    }

    #[test]
    fn test_customize_changes_hashed_content() {
        let plain = ChainBuilder::new(1).build();
        let tagged = ChainBuilder::new(1)
            .customize(|e| e.with_metadata("region", "eu"))
            .build();
        assert_eq!(tagged[0].metadata.get("region").map(String::as_str), Some("eu"));
        assert_ne!(plain[0].content_hash, tagged[0].content_hash);
    }
}
