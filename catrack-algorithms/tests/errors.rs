mod common;

use catrack_algorithms::{reconstruct_cpu, Tracker};
use catrack_core::{Error, Hit, ScratchArray, SliceGeometry, SliceInput, TrackerConfig};
use common::{geometry, line, random_slice};

#[test]
fn test_start_hit_capacity() {
    let input = SliceInput::new(0, geometry(6), line(0, 0..6, 0.05, 0.02));
    let config = TrackerConfig::default().with_capacities(0, 16);
    let err = reconstruct_cpu(&input, &config).unwrap_err();

    assert!(matches!(
        err,
        Error::CapacityExceeded {
            array: ScratchArray::StartHits,
            required: 1,
            capacity: 0
        }
    ));
    assert_eq!(err.overflow(), Some((ScratchArray::StartHits, 1)));
    assert!(err.to_string().contains("start hits"));
}

#[test]
fn test_tracklet_capacity() {
    let input = random_slice(3, 20, 10, 0);
    let baseline = reconstruct_cpu(&input, &TrackerConfig::default()).expect("valid slice");
    let finished = baseline.statistics.tracklets;
    assert!(finished > 1);

    let config = TrackerConfig::default().with_capacities(1 << 10, finished - 1);
    let err = reconstruct_cpu(&input, &config).unwrap_err();
    assert_eq!(err.overflow(), Some((ScratchArray::Tracklets, 1)));
}

#[test]
fn test_hit_outside_rows() {
    let mut hits = line(0, 0..4, 0.05, 0.02);
    hits.push(Hit::new(77, 4, 1.0, 1.0));
    let input = SliceInput::new(0, geometry(4), hits);
    let err = reconstruct_cpu(&input, &TrackerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidRow { hit: 77, row: 4, n_rows: 4 }));
}

#[test]
fn test_non_finite_hit() {
    let input = SliceInput::new(0, geometry(3), vec![Hit::new(5, 1, f32::NAN, 0.0)]);
    let err = reconstruct_cpu(&input, &TrackerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidHit { hit: 5, .. }));
}

#[test]
fn test_duplicate_hit_ids() {
    // Two distinct lines reusing the same ids.
    let mut hits = line(0, 0..6, 0.05, 0.02);
    hits.extend(line(0, 0..6, -0.1, 0.02));
    let input = SliceInput::new(0, geometry(6), hits);
    let err = reconstruct_cpu(&input, &TrackerConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidHit {
            hit: 0,
            reason: "duplicate hit id"
        }
    ));
    assert!(err.to_string().contains("duplicate hit id"));
}

#[test]
fn test_bad_geometry() {
    let input = SliceInput::new(0, SliceGeometry::new(vec![80.0, 79.0]), Vec::new());
    let err = reconstruct_cpu(&input, &TrackerConfig::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidGeometry(_)));
}

#[test]
fn test_invalid_config() {
    let err = Tracker::new(TrackerConfig::default().with_row_block_size(0)).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}
