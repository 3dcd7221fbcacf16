use std::cmp::Ordering;
use std::sync::Arc;

use super::endpoint::{Bandwidth, Source};

/// Order two bandwidth estimates. An `Unknown` estimate ranks below any
/// measured value.
///
/// Two `Unknown` estimates compare as `Greater` unconditionally, which is
/// not symmetric under argument swap. A stable but arbitrary tie-break that
/// [`pick_best`] depends on; do not symmetrize.
pub fn compare_bandwidth(a: Bandwidth, b: Bandwidth) -> Ordering {
    match (a.value(), b.value()) {
        (None, None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

/// Pick the best candidate under [`compare_bandwidth`].
///
/// A candidate replaces the incumbent only when it compares strictly
/// `Greater`, so with every bandwidth unknown the fold walks forward and the
/// last candidate in iteration order wins — the same outcome as a `max` scan
/// with the asymmetric comparator above.
pub fn pick_best(candidates: &[Arc<Source>]) -> Option<Arc<Source>> {
    let mut best: Option<&Arc<Source>> = None;
    for candidate in candidates {
        match best {
            None => best = Some(candidate),
            Some(current) => {
                if compare_bandwidth(candidate.bandwidth(), current.bandwidth())
                    == Ordering::Greater
                {
                    best = Some(candidate);
                }
            }
        }
    }
    best.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::TransferRules;
    use crate::source::SourceConfig;
    use url::Url;
    use uuid::Uuid;

    fn source_with_bandwidth(id: u32, bytes_per_sample: Option<u64>) -> Arc<Source> {
        let rules = TransferRules {
            min_samples: 2,
            ..TransferRules::default()
        };
        let source = Source::new(
            id,
            SourceConfig {
                url: Url::parse(&format!("https://mirror{id}.example.com/")).expect("url"),
                username: None,
                password: None,
                max_download: 4,
            },
            &rules,
        );
        if let Some(bytes) = bytes_per_sample {
            let transfer = Uuid::new_v4();
            source.begin_transfer(transfer);
            for _ in 0..4 {
                source.record_bytes(transfer, bytes);
            }
        }
        Arc::new(source)
    }

    #[test]
    fn measured_beats_unknown() {
        // Scenario: X at 500 kB/s, Y unknown.
        let x = source_with_bandwidth(1, Some(125_000));
        let y = source_with_bandwidth(2, None);
        let best = pick_best(&[y.clone(), x.clone()]).expect("candidate");
        assert_eq!(best.id(), x.id());
        let best = pick_best(&[x.clone(), y]).expect("candidate");
        assert_eq!(best.id(), x.id());
    }

    #[test]
    fn highest_measured_bandwidth_wins() {
        let slow = source_with_bandwidth(1, Some(10));
        let fast = source_with_bandwidth(2, Some(10_000));
        let mid = source_with_bandwidth(3, Some(500));
        let best = pick_best(&[slow, fast.clone(), mid]).expect("candidate");
        assert_eq!(best.id(), fast.id());
    }

    #[test]
    fn unknown_tie_is_asymmetric_but_selection_is_deterministic() {
        assert_eq!(
            compare_bandwidth(Bandwidth::Unknown, Bandwidth::Unknown),
            Ordering::Greater
        );
        let a = source_with_bandwidth(1, None);
        let b = source_with_bandwidth(2, None);
        // Last candidate wins the all-unknown fold, every time.
        for _ in 0..3 {
            let best = pick_best(&[a.clone(), b.clone()]).expect("candidate");
            assert_eq!(best.id(), b.id());
        }
    }

    #[test]
    fn empty_candidate_list_yields_none() {
        assert!(pick_best(&[]).is_none());
    }

    #[test]
    fn source_compare_breaks_bandwidth_ties_by_id() {
        let a = source_with_bandwidth(1, Some(100));
        let b = source_with_bandwidth(2, Some(100));
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
    }
}
