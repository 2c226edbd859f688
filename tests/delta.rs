use adaptive_cuckoo_filter::{
    Adaptation, AdaptiveCuckooFilter, Error, RegisterUpdate, SlotIndex, apply_register_delta,
};

fn zero_snapshot<K: std::hash::Hash>(filter: &AdaptiveCuckooFilter<K>) -> Vec<Vec<u64>> {
    vec![vec![0; filter.buckets()]; filter.tables()]
}

#[test]
fn test_empty_filter_has_empty_delta() {
    let filter = AdaptiveCuckooFilter::<u64>::new(2, 8, 1, 16).unwrap();
    assert_eq!(filter.compute_register_delta(&zero_snapshot(&filter)), Ok(vec![]));
    assert_eq!(filter.register_view(), zero_snapshot(&filter));
}

#[test]
fn test_applying_delta_converges() {
    let mut filter = AdaptiveCuckooFilter::<u64>::builder()
        .tables(3)
        .buckets(32)
        .slots(1)
        .seed(4)
        .build()
        .unwrap();
    for key in 0u64..40 {
        filter.insert(key).unwrap();
    }

    let mut snapshot = zero_snapshot(&filter);
    let delta = filter.compute_register_delta(&snapshot).unwrap();
    assert!(!delta.is_empty());
    assert!(delta.len() <= 40);
    // Ordered by table, then bucket.
    assert!(delta.windows(2).all(|pair| (pair[0].table, pair[0].bucket) < (pair[1].table, pair[1].bucket)));

    apply_register_delta(&mut snapshot, &delta);
    assert_eq!(snapshot, filter.register_view());
    assert_eq!(filter.compute_register_delta(&snapshot), Ok(vec![]));
}

#[test]
fn test_delta_is_pure() {
    let mut filter = AdaptiveCuckooFilter::<u64>::new(2, 16, 1, 16).unwrap();
    for key in 0u64..10 {
        filter.insert(key).unwrap();
    }
    let snapshot = zero_snapshot(&filter);
    let view = filter.register_view();

    let first = filter.compute_register_delta(&snapshot).unwrap();
    let second = filter.compute_register_delta(&snapshot).unwrap();
    assert_eq!(first, second);
    assert_eq!(filter.register_view(), view);
    assert_eq!(filter.len(), 10);
}

#[test]
fn test_register_scale_divides_fingerprints() {
    let mut filter = AdaptiveCuckooFilter::<u64>::builder()
        .tables(2)
        .buckets(16)
        .slots(1)
        .fingerprint_bits(16)
        .register_scale(4)
        .seed(2)
        .build()
        .unwrap();
    let index = filter.insert(123).unwrap();
    let fingerprint = filter.slot(index).unwrap();

    let view = filter.register_view();
    assert_eq!(view[index.table][index.bucket], fingerprint.value() as u64 / 4);
    assert!(view.iter().flatten().all(|&value| value < (1 << 14)));

    let delta = filter.compute_register_delta(&zero_snapshot(&filter)).unwrap();
    let expected = fingerprint.value() as u64 / 4;
    if expected == 0 {
        assert!(delta.is_empty());
    } else {
        assert_eq!(
            delta,
            vec![RegisterUpdate {
                table: index.table,
                bucket: index.bucket,
                value: expected,
            }]
        );
    }
}

#[test]
fn test_fingerprints_below_scale_read_as_empty() {
    let mut filter = AdaptiveCuckooFilter::<u64>::builder()
        .tables(2)
        .buckets(8)
        .fingerprint_bits(8)
        .register_scale(256)
        .seed(3)
        .build()
        .unwrap();
    for key in 0u64..6 {
        filter.insert(key).unwrap();
    }
    assert_eq!(filter.len(), 6);
    assert_eq!(filter.register_view(), zero_snapshot(&filter));
    assert_eq!(filter.compute_register_delta(&zero_snapshot(&filter)), Ok(vec![]));
}

#[test]
fn test_only_first_slot_is_mirrored() {
    let mut filter = AdaptiveCuckooFilter::<u64>::builder()
        .tables(2)
        .buckets(4)
        .slots(4)
        .seed(8)
        .build()
        .unwrap();
    for key in 0u64..20 {
        filter.insert(key).unwrap();
    }

    let view = filter.register_view();
    for table in 0..2 {
        for bucket in 0..4 {
            let first = filter
                .slot(SlotIndex::new(table, bucket, 0))
                .map_or(0, |fingerprint| fingerprint.value() as u64);
            assert_eq!(view[table][bucket], first);
        }
    }
}

#[test]
fn test_snapshot_shape_is_checked() {
    let filter = AdaptiveCuckooFilter::<u64>::new(2, 4, 1, 8).unwrap();
    let expected = Err(Error::SnapshotShape { tables: 2, buckets: 4 });

    assert_eq!(filter.compute_register_delta(&[[0u64; 4]; 3]), expected);
    assert_eq!(filter.compute_register_delta(&[vec![0u64; 4], vec![0u64; 3]]), expected);
    assert_eq!(filter.compute_register_delta::<Vec<u64>>(&[]), expected);
    assert_eq!(filter.compute_register_delta(&[[0u64; 4]; 2]), Ok(vec![]));
}

#[test]
fn test_delta_follows_adaptation() {
    let mut filter = AdaptiveCuckooFilter::<u64>::builder()
        .tables(2)
        .buckets(4)
        .slots(1)
        .fingerprint_bits(8)
        .seed(6)
        .build()
        .unwrap();
    let resident = 500;
    let before = filter.insert(resident).unwrap();
    let mut snapshot = zero_snapshot(&filter);
    let initial = filter.compute_register_delta(&snapshot).unwrap();
    apply_register_delta(&mut snapshot, &initial);
    assert_eq!(snapshot, filter.register_view());

    let engine = filter.fingerprint_engine();
    let query = (0u64..)
        .filter(|&key| key != resident)
        .find(|key| {
            engine.bucket_index(key, 0) == engine.bucket_index(&resident, 0)
                && engine.fingerprint(key, 0) == engine.fingerprint(&resident, 0)
        })
        .unwrap();
    let Ok(Adaptation::Relocated(after)) = filter.adapt_false_positive(&query) else {
        panic!("resident should move to the second table");
    };

    let delta = filter.compute_register_delta(&snapshot).unwrap();
    let old_value = filter.fingerprint_engine().fingerprint(&resident, 0).value() as u64;
    let new_value = filter.slot(after).unwrap().value() as u64;
    if old_value != 0 {
        assert!(delta.contains(&RegisterUpdate {
            table: before.table,
            bucket: before.bucket,
            value: 0,
        }));
    }
    if new_value != 0 {
        assert!(delta.contains(&RegisterUpdate {
            table: after.table,
            bucket: after.bucket,
            value: new_value,
        }));
    }

    apply_register_delta(&mut snapshot, &delta);
    assert_eq!(snapshot, filter.register_view());
}

#[test]
fn test_apply_ignores_out_of_range_updates() {
    let mut snapshot = vec![vec![0u64; 2]; 2];
    let updates = [
        RegisterUpdate { table: 1, bucket: 1, value: 9 },
        RegisterUpdate { table: 2, bucket: 0, value: 5 },
        RegisterUpdate { table: 0, bucket: 7, value: 5 },
    ];
    apply_register_delta(&mut snapshot, &updates);
    assert_eq!(snapshot, vec![vec![0, 0], vec![0, 9]]);
}
