//! Property-based tests for the bindings against the mock engine.
//!
//! These check output shapes and structural invariants over randomly
//! sized inputs.

use proptest::prelude::*;
use vl_bind::{
    fisher_encode, ikm_push_one, vlad_encode, Aib, Engine, FfiError, FisherFlags, IKMeans, IkmAlgorithm, TypeTag,
    VladFlags,
};

// ============================================================
// Encoders
// ============================================================

proptest! {
    #[test]
    fn vlad_length_is_dimension_times_clusters(
        dimension in 1usize..8,
        num_clusters in 1usize..6,
        num_data in 0usize..10,
    ) {
        let means: Vec<f32> = (0..dimension * num_clusters).map(|i| i as f32).collect();
        let data: Vec<f32> = (0..dimension * num_data).map(|i| (i % 7) as f32).collect();
        let assignments: Vec<f32> = (0..num_data * num_clusters)
            .map(|i| if i % num_clusters == 0 { 1.0 } else { 0.0 })
            .collect();
        let enc = vlad_encode(
            Engine::mock(),
            TypeTag::Float32,
            &means,
            dimension,
            num_clusters,
            &data,
            &assignments,
            VladFlags::empty(),
        )
        .unwrap();
        prop_assert_eq!(enc.len(), dimension * num_clusters);
    }

    #[test]
    fn vlad_rejects_ragged_data(dimension in 2usize..8, num_clusters in 1usize..6, extra in 1usize..8) {
        let extra = extra % dimension;
        prop_assume!(extra != 0);
        let means = vec![0.0f64; dimension * num_clusters];
        let data = vec![0.0f64; dimension + extra];
        let assignments = vec![0.0f64; num_clusters];
        let result = vlad_encode(
            Engine::mock(),
            TypeTag::Float64,
            &means,
            dimension,
            num_clusters,
            &data,
            &assignments,
            VladFlags::empty(),
        );
        let is_size_mismatch = matches!(result, Err(FfiError::SizeMismatch { .. }));
        prop_assert!(is_size_mismatch);
    }

    #[test]
    fn fisher_length_is_twice_the_model(dimension in 1usize..6, num_clusters in 1usize..5, num_data in 1usize..8) {
        let means: Vec<f64> = (0..dimension * num_clusters).map(|i| i as f64).collect();
        let covariances = vec![1.0f64; dimension * num_clusters];
        let priors = vec![1.0 / num_clusters as f64; num_clusters];
        let data: Vec<f64> = (0..dimension * num_data).map(|i| (i % 5) as f64).collect();
        let fisher = fisher_encode(
            Engine::mock(),
            TypeTag::Float64,
            &means,
            dimension,
            num_clusters,
            &covariances,
            &priors,
            &data,
            FisherFlags::empty(),
        )
        .unwrap();
        prop_assert_eq!(fisher.encoding.len(), 2 * dimension * num_clusters);
        prop_assert!(fisher.num_terms <= num_data * num_clusters);
    }
}

// ============================================================
// Clustering
// ============================================================

proptest! {
    #[test]
    fn ikmeans_assignments_are_valid_centers(
        dimension in 1usize..4,
        k in 1usize..4,
        points in prop::collection::vec(any::<u8>(), 12..48),
    ) {
        let num_data = points.len() / dimension;
        prop_assume!(num_data >= k);
        let points = &points[..num_data * dimension];

        let mut ikm = IKMeans::new(Engine::mock(), IkmAlgorithm::Lloyd).unwrap();
        ikm.init_rand_data(points, dimension, k).unwrap();
        ikm.train(points).unwrap();
        let assignments = ikm.push(points).unwrap();
        prop_assert_eq!(assignments.len(), num_data);
        prop_assert!(assignments.iter().all(|&a| (a as usize) < k));

        let centers = ikm.centers().unwrap().to_vec();
        for (point, &assigned) in points.chunks(dimension).zip(&assignments) {
            prop_assert_eq!(ikm_push_one(Engine::mock(), &centers, point).unwrap(), assigned);
        }
    }

    #[test]
    fn aib_tree_merges_upwards(num_labels in 1usize..4, weights in prop::collection::vec(0.0f64..1.0, 2..24)) {
        let num_values = weights.len() / num_labels;
        prop_assume!(num_values >= 1);
        let pcx = &weights[..num_values * num_labels];

        let mut aib = Aib::new(Engine::mock(), pcx, num_values, num_labels).unwrap();
        aib.process();
        let parents = aib.parents().unwrap();
        let root = 2 * num_values - 2;
        prop_assert_eq!(parents.len(), root + 1);
        prop_assert_eq!(parents[root] as usize, root);
        for (node, &parent) in parents.iter().enumerate().take(root) {
            prop_assert!(parent as usize > node);
            prop_assert!(parent as usize >= num_values);
        }
        prop_assert_eq!(aib.costs().unwrap().len(), num_values);
    }
}
