//! Least-recently-used victim selection for byte-bounded tiers

use chrono::{DateTime, Utc};

/// What the evictor needs to know about one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionCandidate<'a> {
    pub key: &'a str,
    pub size_bytes: u64,
    pub last_accessed_at: DateTime<Utc>,
}

/// Entries to remove, in removal order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub victims: Vec<String>,
    pub freed_bytes: u64,
    /// False when removing every candidate still frees too little
    pub satisfied: bool,
}

pub struct QuotaEvictor;

impl QuotaEvictor {
    /// Bytes that must be freed before `incoming` more bytes fit under `quota`
    pub fn bytes_needed(current_total: u64, incoming: u64, quota: u64) -> u64 {
        current_total
            .saturating_add(incoming)
            .saturating_sub(quota)
    }

    /// Pick victims oldest-access first until `bytes_needed` are freed
    ///
    /// Ties on access time go to the lexicographically smaller key.
    pub fn plan<'a, I>(candidates: I, bytes_needed: u64) -> EvictionPlan
    where
        I: IntoIterator<Item = EvictionCandidate<'a>>,
    {
        if bytes_needed == 0 {
            return EvictionPlan {
                satisfied: true,
                ..EvictionPlan::default()
            };
        }

        let mut ordered: Vec<EvictionCandidate<'a>> = candidates.into_iter().collect();
        ordered.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| a.key.cmp(b.key))
        });

        let mut plan = EvictionPlan::default();
        for candidate in ordered {
            if plan.freed_bytes >= bytes_needed {
                break;
            }
            plan.freed_bytes += candidate.size_bytes;
            plan.victims.push(candidate.key.to_string());
        }
        plan.satisfied = plan.freed_bytes >= bytes_needed;
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap()
    }

    fn candidate(key: &str, size_bytes: u64, minute: u32) -> EvictionCandidate<'_> {
        EvictionCandidate {
            key,
            size_bytes,
            last_accessed_at: at(minute),
        }
    }

    #[test]
    fn test_bytes_needed() {
        assert_eq!(QuotaEvictor::bytes_needed(80, 40, 100), 20);
        assert_eq!(QuotaEvictor::bytes_needed(40, 40, 100), 0);
        assert_eq!(QuotaEvictor::bytes_needed(u64::MAX, 1, 100), u64::MAX - 100);
    }

    #[test]
    fn test_nothing_needed_evicts_nothing() {
        let plan = QuotaEvictor::plan(vec![candidate("a", 10, 1)], 0);
        assert!(plan.victims.is_empty());
        assert!(plan.satisfied);
    }

    #[test]
    fn test_oldest_access_goes_first() {
        let candidates = vec![
            candidate("c", 10, 3),
            candidate("a", 10, 5),
            candidate("b", 10, 1),
        ];
        let plan = QuotaEvictor::plan(candidates, 15);
        assert_eq!(plan.victims, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(plan.freed_bytes, 20);
        assert!(plan.satisfied);
    }

    #[test]
    fn test_stops_as_soon_as_enough_is_freed() {
        let candidates = vec![candidate("old", 50, 1), candidate("new", 50, 2)];
        let plan = QuotaEvictor::plan(candidates, 20);
        assert_eq!(plan.victims, vec!["old".to_string()]);
    }

    #[test]
    fn test_ties_break_on_key() {
        let candidates = vec![
            candidate("zebra", 5, 1),
            candidate("apple", 5, 1),
            candidate("mango", 5, 1),
        ];
        let plan = QuotaEvictor::plan(candidates, 6);
        assert_eq!(plan.victims, vec!["apple".to_string(), "mango".to_string()]);
    }

    #[test]
    fn test_unsatisfiable_takes_everything() {
        let candidates = vec![candidate("a", 10, 1), candidate("b", 10, 2)];
        let plan = QuotaEvictor::plan(candidates, 100);
        assert_eq!(plan.victims.len(), 2);
        assert_eq!(plan.freed_bytes, 20);
        assert!(!plan.satisfied);
    }
}
