use pictor_core::driver::{ColorDriver, FeatureDriver, IdfDriver};
use pictor_core::image::{encode_ppm, Image};
use pictor_core::index::{FlatIndex, IndexEntry};
use pictor_core::similarity::{cosine_similarity, histogram_intersection};
use pictor_core::{Config, Database, DriverConfig, FeatureVector, RecordId};
use proptest::prelude::*;

/// Small random RGB images.
fn arb_image() -> impl Strategy<Value = Image> {
    (1usize..12, 1usize..12).prop_flat_map(|(w, h)| {
        proptest::collection::vec(any::<[u8; 3]>(), w * h)
            .prop_map(move |pixels| Image::from_pixels(w, h, pixels).unwrap())
    })
}

proptest! {
    #[test]
    fn test_color_similarity_symmetric_and_bounded(a in arb_image(), b in arb_image(), w in 0.0f64..=1.0) {
        let driver = ColorDriver::new(w).unwrap();
        let fa = driver.extract(&a).unwrap();
        let fb = driver.extract(&b).unwrap();

        let ab = driver.similarity(&fa, &fb);
        prop_assert_eq!(ab, driver.similarity(&fb, &fa));
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((driver.similarity(&fa, &fa) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_idf_similarity_symmetric_and_bounded(a in arb_image(), b in arb_image()) {
        let driver = IdfDriver::new();
        let fa = driver.extract(&a).unwrap();
        let fb = driver.extract(&b).unwrap();

        let ab = driver.similarity(&fa, &fb);
        prop_assert_eq!(ab, driver.similarity(&fb, &fa));
        prop_assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn test_intersection_matches_naive(
        a in proptest::collection::vec(0.0f32..1.0f32, 0..100),
        b in proptest::collection::vec(0.0f32..1.0f32, 0..100)
    ) {
        let len = std::cmp::min(a.len(), b.len());
        let a = &a[..len];
        let b = &b[..len];

        let naive: f32 = a.iter().zip(b.iter()).map(|(x, y)| if x < y { *x } else { *y }).sum();
        prop_assert!((histogram_intersection(a, b) - naive).abs() < 1e-4);
    }

    #[test]
    fn test_cosine_in_range(
        a in proptest::collection::vec(-1.0f32..1.0f32, 1..100),
        b in proptest::collection::vec(-1.0f32..1.0f32, 1..100)
    ) {
        let len = std::cmp::min(a.len(), b.len());
        let s = cosine_similarity(&a[..len], &b[..len]);
        prop_assert!((-1.0..=1.0).contains(&s));
    }

    #[test]
    fn test_flat_search_matches_full_sort(
        values in proptest::collection::vec(0u8..8, 1..60),
        k in 1usize..80
    ) {
        // Few distinct scores so ties are common.
        let index = FlatIndex::new();
        let mut expected = Vec::new();
        for (seq, v) in values.iter().enumerate() {
            let id = RecordId::generate();
            let feature = FeatureVector::new("test/v1", vec![*v as f32]);
            index.insert(IndexEntry { id, seq: seq as u64, feature }).unwrap();
            expected.push((-(*v as f32), seq as u64, id));
        }
        expected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        expected.truncate(k);

        let query = FeatureVector::new("test/v1", vec![0.0]);
        let hits = index.search(&query, k, |_, e| e.values()[0]);
        let got: Vec<RecordId> = hits.iter().map(|h| h.id).collect();
        let want: Vec<RecordId> = expected.iter().map(|e| e.2).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn test_search_sorted_descending(
        colors in proptest::collection::vec(any::<[u8; 3]>(), 1..12),
        query in any::<[u8; 3]>(),
        k in 1usize..16
    ) {
        let db = Database::open(Config::new(DriverConfig::new("color"))).unwrap();
        for c in &colors {
            db.insert(encode_ppm(2, 2, &[*c; 4])).unwrap();
        }
        let results = db.search(k, encode_ppm(2, 2, &[query; 4])).unwrap();
        prop_assert_eq!(results.len(), k.min(colors.len()));
        for pair in results.windows(2) {
            prop_assert!(pair[0].similarity >= pair[1].similarity);
        }
    }
}
