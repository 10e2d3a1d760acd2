mod common;

use common::{Session, groups_of};
use proptest::prelude::*;
use shardgroup_columnar::{ArrayValueLookup, ConstantValueLookup, IntValueLookup, MemoryShard};
use shardgroup_engine::{
    bucket::{AxisBucketer, GridBucketer, IntervalBucketer},
    regroup::metric,
};
use shardgroup_testkit::{data_gen, reference};

fn run_metric(
    groups: &[u32],
    metric_values: &dyn IntValueLookup,
    bucketer: &IntervalBucketer,
) -> (Vec<u32>, u32) {
    let session = Session::new(MemoryShard::builder(groups.len()).build());
    let mut lookup = session.lookup(groups);
    let n = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_regroup(lookup, scan, metric_values, bucketer)
        })
        .unwrap();
    assert_eq!(lookup.num_groups(), n);
    (groups_of(&lookup), n)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn metric_regroup_matches_reference(
        seed in any::<u64>(),
        min in -30i64..30,
        width in 1i64..40,
        interval in 1i64..12,
        no_gutters in any::<bool>(),
    ) {
        let max = min + width;
        let mut rng = fastrand::Rng::with_seed(seed);
        let num_groups = rng.u32(1..6);
        let groups = data_gen::random_groups(&mut rng, 150, num_groups);
        let values: Vec<i64> = (0..150).map(|_| rng.i64(-50..50)).collect();
        let bucketer = IntervalBucketer::new(min, max, interval, no_gutters).unwrap();

        let (actual, n) = run_metric(&groups, &ArrayValueLookup::new(values.clone()), &bucketer);
        let expected = reference::metric_regroup(&groups, &values, min, max, interval, no_gutters);
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(n, reference::num_groups(&expected));
    }

    #[test]
    fn single_valued_metric_takes_fast_path(
        seed in any::<u64>(),
        value in -20i64..20,
        no_gutters in any::<bool>(),
    ) {
        let mut rng = fastrand::Rng::with_seed(seed);
        let groups = data_gen::random_groups(&mut rng, 64, 4);
        let bucketer = IntervalBucketer::new(-10, 10, 3, no_gutters).unwrap();

        let (fast, _) = run_metric(&groups, &ConstantValueLookup(value), &bucketer);
        let (general, _) = run_metric(&groups, &ArrayValueLookup::new(vec![value; 64]), &bucketer);
        prop_assert_eq!(&fast, &general);
        prop_assert_eq!(
            fast,
            reference::metric_regroup(&groups, &[value; 64], -10, 10, 3, no_gutters)
        );
    }
}

#[test]
fn test_bucket_boundaries() {
    let groups = [1, 1, 1, 1, 2];
    let values = [0, 9, 10, -1, 5];
    let bucketer = IntervalBucketer::new(0, 10, 5, false).unwrap();
    let (actual, n) = run_metric(&groups, &ArrayValueLookup::new(values.to_vec()), &bucketer);
    // Two buckets plus two gutters per group; `max` itself is above range.
    assert_eq!(actual, vec![1, 2, 4, 3, 6]);
    assert_eq!(n, 7);
}

#[test]
fn test_single_bucket_range() {
    let groups = [1, 2, 1, 2];
    let values = [3, 5, 4, 2];
    let bucketer = IntervalBucketer::new(3, 5, 2, true).unwrap();
    assert_eq!(bucketer.num_buckets(), 1);
    let (actual, n) = run_metric(&groups, &ArrayValueLookup::new(values.to_vec()), &bucketer);
    assert_eq!(actual, vec![1, 0, 1, 0]);
    assert_eq!(n, 2);
}

#[test]
fn test_constant_lookup_fast_path_stays_constant() {
    let session = Session::new(MemoryShard::builder(100).build());
    let mut lookup = shardgroup_engine::GroupLookup::constant(1, 100);
    let bucketer = IntervalBucketer::new(0, 100, 10, false).unwrap();
    let before = session.memory.used();
    let n = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_regroup(lookup, scan, &ConstantValueLookup(42), &bucketer)
        })
        .unwrap();
    assert_eq!(n, 6);
    assert!(lookup.is_constant());
    assert_eq!(lookup.get(99), 5);
    assert_eq!(session.memory.used(), before);
}

#[test]
fn test_grid_regroup_boundary_cases() {
    // x and y over [0, 10) step 5: four indexes per axis, gutters included.
    // Each axis runs below / within / above; the old group never matters
    // unless it is 0.
    let groups = [1, 2, 3, 1, 2, 3, 1, 2, 3, 0];
    let xs = ArrayValueLookup::new(vec![-4, -4, -4, 7, 7, 7, 10, 10, 10, 7]);
    let ys = ArrayValueLookup::new(vec![-1, 7, 25, -1, 7, 25, -1, 7, 25, 7]);
    let grid = GridBucketer::new(
        AxisBucketer::new("x", 0, 10, 5).unwrap(),
        AxisBucketer::new("y", 0, 10, 5).unwrap(),
    );
    let session = Session::new(MemoryShard::builder(groups.len()).build());
    let mut lookup = session.lookup(&groups);
    let before = session.memory.used() - lookup.memory_used();
    let n = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_regroup_2d(lookup, scan, &xs, &ys, &grid)
        })
        .unwrap();
    assert_eq!(groups_of(&lookup), vec![1, 9, 13, 3, 11, 15, 4, 12, 16, 0]);
    assert_eq!(n, 17);
    assert_eq!(session.memory.used() - lookup.memory_used(), before);
}

#[test]
fn test_grid_regroup_ignores_previous_group() {
    // Same values, different groups: same cells.
    let grid = GridBucketer::new(
        AxisBucketer::new("x", 0, 10, 5).unwrap(),
        AxisBucketer::new("y", 0, 10, 5).unwrap(),
    );
    let xs = ArrayValueLookup::new(vec![12, 12, 3]);
    let ys = ArrayValueLookup::new(vec![-3, -3, 3]);
    let session = Session::new(MemoryShard::builder(3).build());
    let mut lookup = session.lookup(&[1, 2, 5]);
    let n = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_regroup_2d(lookup, scan, &xs, &ys, &grid)
        })
        .unwrap();
    assert_eq!(groups_of(&lookup), vec![4, 4, 6]);
    assert_eq!(n, 7);
}

#[test]
fn test_metric_filter_edges() {
    let values = ArrayValueLookup::new(vec![-5, 0, 5, 10, 11]);
    let session = Session::new(MemoryShard::builder(5).build());

    let mut lookup = session.lookup(&[1, 1, 2, 2, 2]);
    let n = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_filter(lookup, scan, &values, 0, 10, false)
        })
        .unwrap();
    assert_eq!(groups_of(&lookup), vec![0, 1, 2, 2, 0]);
    assert_eq!(n, 3);

    let mut lookup = session.lookup(&[1, 1, 2, 2, 2]);
    session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_filter(lookup, scan, &values, 0, 10, true)
        })
        .unwrap();
    assert_eq!(groups_of(&lookup), vec![1, 0, 0, 0, 2]);
}

#[test]
fn test_too_many_groups_is_rejected() {
    let groups = [1, 2, 3];
    let bucketer = IntervalBucketer::new(0, 3_000_000_000, 1, false).unwrap();
    let session = Session::new(MemoryShard::builder(3).build());
    let mut lookup = session.lookup(&groups);
    let err = session
        .run(&mut lookup, |lookup, scan| {
            metric::metric_regroup(lookup, scan, &ArrayValueLookup::new(vec![1, 2, 3]), &bucketer)
        })
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(groups_of(&lookup), vec![1, 2, 3]);
}
