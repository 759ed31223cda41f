//! End-to-end scenarios against the mock engine.
//!
//! Each scenario drives a binding the way an application would: create,
//! configure, process, read results back.

use vl_bind::{
    fisher_encode, slic_segment, vlad_encode, CovDet, CovDetMethod, Engine, FisherFlags, Gmm, KMeans, KdForest,
    Mser, QuickShift, Sift, SlicParams, TypeTag, VectorComparison, VladFlags,
};

/// Twelve 4-dimensional points in three well-separated groups.
fn points() -> Vec<f64> {
    let mut points = Vec::with_capacity(48);
    for base in [0.0, 10.0, 20.0] {
        for offset in [0.0, 0.1, 0.2, 0.3] {
            points.extend([base + offset; 4]);
        }
    }
    points
}

// ============================================================
// Clustering
// ============================================================

#[test]
fn kmeans_float64_three_centers() {
    let mut kmeans = KMeans::new(Engine::mock(), TypeTag::Float64, VectorComparison::DistanceL2).unwrap();
    kmeans.cluster(&points(), 4, 3).unwrap();

    assert_eq!(kmeans.num_centers(), 3);
    let rows: Vec<Vec<f64>> = kmeans.center_rows().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|row| row.len() == 4));
}

#[test]
fn kmeans_quantizes_onto_its_centers() {
    let mut kmeans = KMeans::new(Engine::mock(), TypeTag::Float32, VectorComparison::DistanceL2).unwrap();
    kmeans.cluster(&points(), 4, 3).unwrap();
    let (assignments, distances) = kmeans.quantize(&points()).unwrap();
    assert_eq!(assignments.len(), 12);
    assert_eq!(distances.len(), 12);
    assert!(assignments.iter().all(|a| *a < 3));
}

#[test]
fn gmm_initialized_from_kmeans() {
    let engine = Engine::mock();
    let data = points();
    let mut kmeans = KMeans::new(engine, TypeTag::Float64, VectorComparison::DistanceL2).unwrap();
    let mut gmm = Gmm::new(engine, TypeTag::Float64, 4, 3).unwrap();
    gmm.init_with_kmeans(&data, &mut kmeans).unwrap();
    gmm.em(&data).unwrap();

    assert_eq!(gmm.means::<f64>().len(), 12);
    assert_eq!(gmm.covariances::<f64>().len(), 12);
    assert_eq!(gmm.priors::<f64>().len(), 3);
    assert_eq!(gmm.posteriors::<f64>().unwrap().len(), 36);
}

// ============================================================
// Nearest neighbours
// ============================================================

#[test]
fn kdforest_finds_exact_point() {
    let data = points();
    let mut forest = KdForest::new(Engine::mock(), TypeTag::Float64, 4, 2, VectorComparison::DistanceL2).unwrap();
    forest.build(&data).unwrap();

    let (_, neighbors) = forest.query(2, &data[20..24]).unwrap();
    assert_eq!(neighbors.len(), 2);
    assert_eq!(neighbors[0].index, 5);
    assert_eq!(neighbors[0].distance, 0.0);

    let mut searcher = forest.new_searcher().unwrap();
    let (_, again) = searcher.query(1, &data[20..24]).unwrap();
    assert_eq!(again[0].index, 5);
}

// ============================================================
// Local features
// ============================================================

#[test]
fn covdet_empty_image_yields_no_features() {
    let mut covdet = CovDet::new(Engine::mock(), CovDetMethod::DoG).unwrap();
    covdet.put_image(&[], 0, 0).unwrap();
    covdet.detect().unwrap();

    assert_eq!(covdet.num_features(), 0);
    assert!(covdet.features().is_empty());
    assert!(covdet.features().to_vec().is_empty());
}

#[test]
fn covdet_detects_bright_pixels() {
    let mut image = vec![0.0f32; 64];
    image[3 * 8 + 2] = 1.0;
    let mut covdet = CovDet::new(Engine::mock(), CovDetMethod::Hessian).unwrap();
    covdet.put_image(&image, 8, 8).unwrap();
    covdet.detect().unwrap();

    let features = covdet.features();
    assert_eq!(features.len(), 1);
    assert_eq!((features[0].frame.x, features[0].frame.y), (2.0, 3.0));
}

#[test]
fn sift_walks_every_octave() {
    let mut image = vec![0.0f32; 32 * 32];
    image[8 * 32 + 8] = 1.0;
    let mut sift = Sift::new(Engine::mock(), 32, 32, -1, 3, 0).unwrap();

    let mut octaves = 0;
    let mut keypoints = 0;
    let mut more = sift.process_first_octave(&image).unwrap();
    while more {
        octaves += 1;
        sift.detect().unwrap();
        for keypoint in sift.keypoints().to_vec() {
            for angle in sift.keypoint_orientations(&keypoint).unwrap() {
                assert_eq!(sift.keypoint_descriptor(&keypoint, angle).unwrap().len(), 128);
                keypoints += 1;
            }
        }
        more = sift.process_next_octave().unwrap();
    }
    assert_eq!(i32::try_from(octaves).unwrap(), sift.noctaves());
    assert!(keypoints >= 1);
}

#[test]
fn mser_finds_blob() {
    let mut image = vec![0u8; 100];
    for y in 3..6 {
        for x in 4..7 {
            image[y * 10 + x] = 250;
        }
    }
    let mut mser = Mser::new(Engine::mock(), &[10, 10]).unwrap();
    mser.process(&image).unwrap();
    mser.ell_fit().unwrap();

    assert_eq!(mser.regions().as_slice(), &[34]);
    assert_eq!(&mser.ellipses()[..2], &[5.0, 4.0]);
}

// ============================================================
// Segmentation
// ============================================================

#[test]
fn quickshift_and_slic_label_every_pixel() {
    let image: Vec<f64> = (0..12).map(|i| if i < 6 { 0.0 } else { 5.0 }).collect();
    let mut qs = QuickShift::new(Engine::mock(), &image, 3, 4, 1).unwrap();
    qs.process();
    assert_eq!(qs.parents().unwrap().len(), 12);

    let image32: Vec<f32> = image.iter().map(|v| *v as f32).collect();
    let labels = slic_segment(Engine::mock(), &image32, 4, 3, 1, &SlicParams::new(2, 0.1)).unwrap();
    assert_eq!(labels.len(), 12);
    assert_eq!(labels[0], 0);
}

// ============================================================
// Encoders
// ============================================================

#[test]
fn encoders_use_requested_layout() {
    let engine = Engine::mock();
    let means = [0.0f32, 0.0, 1.0, 1.0];
    let data = [0.5f32, 0.0, 1.0, 0.5];
    let assignments = [1.0f32, 0.0, 0.0, 1.0];

    let vlad = vlad_encode(engine, TypeTag::Float32, &means, 2, 2, &data, &assignments, VladFlags::SQUARE_ROOT).unwrap();
    assert_eq!(vlad.len(), 4);

    let fisher = fisher_encode(engine, TypeTag::Float64, &means, 2, 2, &[1.0; 4], &[0.5; 2], &data, FisherFlags::IMPROVED).unwrap();
    assert_eq!(fisher.encoding.len(), 8);
    assert_eq!(fisher.num_terms, 2);
}
