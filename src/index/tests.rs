use super::*;
use tempfile::TempDir;

fn sample_index() -> VectorIndex {
    let mut index = VectorIndex::new(3);
    index.add(&[1.0, 0.0, 0.0]).expect("should add");
    index.add(&[0.0, 1.0, 0.0]).expect("should add");
    index.add(&[0.0, 0.0, 1.0]).expect("should add");
    index.add(&[0.6, 0.8, 0.0]).expect("should add");
    index
}

#[test]
fn add_assigns_sequential_ids() {
    let mut index = VectorIndex::new(2);
    assert!(index.is_empty());
    assert_eq!(index.add(&[1.0, 0.0]).expect("should add"), 0);
    assert_eq!(index.add(&[0.0, 1.0]).expect("should add"), 1);
    assert_eq!(index.len(), 2);
    assert_eq!(index.vector(1), Some(&[0.0, 1.0][..]));
    assert_eq!(index.vector(2), None);
}

#[test]
fn add_rejects_wrong_dimension() {
    let mut index = VectorIndex::new(3);
    let result = index.add(&[1.0, 0.0]);
    assert!(matches!(
        result,
        Err(ChatError::DimensionMismatch {
            expected: 3,
            actual: 2
        })
    ));
    assert!(index.is_empty());
}

#[test]
fn search_orders_by_distance() {
    let index = sample_index();
    let hits = index.search(&[1.0, 0.0, 0.0], 3).expect("search should succeed");

    let ids: Vec<usize> = hits.iter().map(|h| h.id).collect();
    assert_eq!(ids, vec![0, 3, 1]);
    assert!(hits[0].distance.abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn search_never_returns_more_than_len() {
    let index = sample_index();
    let hits = index.search(&[0.0, 0.0, 1.0], 50).expect("search should succeed");
    assert_eq!(hits.len(), 4);

    assert!(
        index
            .search(&[0.0, 0.0, 1.0], 0)
            .expect("search should succeed")
            .is_empty()
    );
}

#[test]
fn search_breaks_ties_by_id() {
    let mut index = VectorIndex::new(2);
    index.add(&[0.0, 1.0]).expect("should add");
    index.add(&[1.0, 0.0]).expect("should add");
    index.add(&[0.0, 1.0]).expect("should add");

    let hits = index.search(&[0.0, 1.0], 2).expect("search should succeed");
    assert_eq!(hits[0].id, 0);
    assert_eq!(hits[1].id, 2);
}

#[test]
fn empty_index_search_is_empty() {
    let index = VectorIndex::new(3);
    assert!(
        index
            .search(&[1.0, 0.0, 0.0], 3)
            .expect("search should succeed")
            .is_empty()
    );
}

#[test]
fn search_rejects_wrong_query_dimension() {
    let index = sample_index();
    assert!(matches!(
        index.search(&[1.0, 0.0], 1),
        Err(ChatError::DimensionMismatch { .. })
    ));
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("nested").join("knowledge.index");

    let index = sample_index();
    index.save(&path).expect("should save");

    assert!(!temp_dir.path().join("nested").join("knowledge.index.tmp").exists());

    let loaded = VectorIndex::load(&path).expect("should load");
    assert_eq!(loaded, index);
    assert_eq!(loaded.dimension(), 3);
}

#[test]
fn from_bytes_rejects_corrupt_files() {
    assert!(matches!(
        VectorIndex::from_bytes(b"garbage"),
        Err(ChatError::Index(_))
    ));

    let mut bytes = sample_index().to_bytes();
    bytes.truncate(bytes.len() - 2);
    assert!(matches!(
        VectorIndex::from_bytes(&bytes),
        Err(ChatError::Index(_))
    ));
}

#[test]
fn l2_distance_matches_euclidean_norm() {
    assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
    assert!(l2_distance(&[1.0, 2.0], &[1.0, 2.0]).abs() < f32::EPSILON);
}
