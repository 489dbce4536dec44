use std::collections::BTreeMap;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{descriptor::Descriptor, repo_types::DescriptorRecord};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub user_id: Uuid,
    pub distance: f32,
}

/// Smallest distance per identity across all of its enrollment captures.
pub fn min_distance_per_identity(
    records: &[DescriptorRecord],
    probe: &Descriptor,
) -> BTreeMap<Uuid, f32> {
    let mut best: BTreeMap<Uuid, f32> = BTreeMap::new();
    for r in records {
        let Some(d) = probe.distance_to(&r.descriptor) else {
            warn!(record_id = %r.id, len = r.descriptor.len(), "skipping descriptor with wrong length");
            continue;
        };
        best.entry(r.user_id)
            .and_modify(|cur| {
                if d < *cur {
                    *cur = d;
                }
            })
            .or_insert(d);
    }
    best
}

/// Closest identity over the whole store. Ties go to the lowest user id.
pub fn best_identity(records: &[DescriptorRecord], probe: &Descriptor) -> Option<MatchOutcome> {
    min_distance_per_identity(records, probe)
        .into_iter()
        .fold(None, |acc: Option<MatchOutcome>, (user_id, distance)| match acc {
            Some(best) if best.distance <= distance => Some(best),
            _ => Some(MatchOutcome { user_id, distance }),
        })
}

/// 1:N identification: accept the closest identity only if strictly under `threshold`.
pub fn identify(
    records: &[DescriptorRecord],
    probe: &Descriptor,
    threshold: f32,
) -> AppResult<MatchOutcome> {
    match best_identity(records, probe) {
        Some(m) if m.distance < threshold => {
            debug!(user_id = %m.user_id, distance = m.distance, "face matched");
            Ok(m)
        }
        Some(m) => {
            debug!(distance = m.distance, threshold, "closest face above threshold");
            Err(AppError::FaceNotRecognized)
        }
        None => Err(AppError::FaceNotRecognized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn record(user_id: Uuid, v: Vec<f32>) -> DescriptorRecord {
        DescriptorRecord {
            id: Uuid::new_v4(),
            user_id,
            descriptor: v,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn probe(v: Vec<f32>) -> Descriptor {
        let n = v.len();
        Descriptor::new(v, n).unwrap()
    }

    #[test]
    fn exact_match_is_accepted_for_any_positive_threshold() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let stored = vec![0.25, -0.5, 0.75, 0.1];
        let records = vec![
            record(alice, stored.clone()),
            record(bob, vec![0.9, 0.9, 0.9, 0.9]),
        ];
        for threshold in [f32::MIN_POSITIVE, 1e-6, 0.3, 0.6, 10.0] {
            let m = identify(&records, &probe(stored.clone()), threshold).unwrap();
            assert_eq!(m.user_id, alice);
            assert_eq!(m.distance, 0.0);
        }
    }

    #[test]
    fn rejects_when_every_record_is_beyond_threshold() {
        let records = vec![
            record(Uuid::new_v4(), vec![1.0, 0.0]),
            record(Uuid::new_v4(), vec![0.0, 1.0]),
        ];
        let err = identify(&records, &probe(vec![-1.0, -1.0]), 0.6).unwrap_err();
        assert!(matches!(err, AppError::FaceNotRecognized));
    }

    #[test]
    fn distance_equal_to_threshold_is_rejected() {
        let records = vec![record(Uuid::new_v4(), vec![3.0, 4.0])];
        let err = identify(&records, &probe(vec![0.0, 0.0]), 5.0).unwrap_err();
        assert!(matches!(err, AppError::FaceNotRecognized));
    }

    #[test]
    fn empty_store_is_not_recognized() {
        assert!(matches!(
            identify(&[], &probe(vec![0.0]), 0.6),
            Err(AppError::FaceNotRecognized)
        ));
    }

    #[test]
    fn uses_each_identity_closest_capture() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        // alice has one far and one near capture, bob sits in between
        let records = vec![
            record(alice, vec![5.0, 5.0]),
            record(bob, vec![0.3, 0.0]),
            record(alice, vec![0.1, 0.0]),
        ];
        let per_identity = min_distance_per_identity(&records, &probe(vec![0.0, 0.0]));
        assert!((per_identity[&alice] - 0.1).abs() < 1e-6);
        assert!((per_identity[&bob] - 0.3).abs() < 1e-6);

        let m = identify(&records, &probe(vec![0.0, 0.0]), 0.6).unwrap();
        assert_eq!(m.user_id, alice);
    }

    #[test]
    fn ties_resolve_to_lowest_user_id() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let records = vec![record(b, vec![0.1]), record(a, vec![-0.1])];
        let m = best_identity(&records, &probe(vec![0.0])).unwrap();
        assert_eq!(m.user_id, a);
    }

    #[test]
    fn records_with_other_dimensionality_are_skipped() {
        let good = Uuid::new_v4();
        let records = vec![
            record(Uuid::new_v4(), vec![0.0, 0.0, 0.0]),
            record(good, vec![0.2, 0.0]),
        ];
        let m = identify(&records, &probe(vec![0.0, 0.0]), 0.6).unwrap();
        assert_eq!(m.user_id, good);
    }
}
