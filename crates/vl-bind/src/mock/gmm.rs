//! Mock `vl_gmm_*`: hard-assignment EM around seeded means.

use super::kmeans::MockKMeans;
use super::{alloc, free, nearest, object, read_f64, read_vec};
use crate::gmm::{GmmApi, VlGMM};
use crate::kmeans::VlKMeans;
use crate::sys::{VlSize, VlType};
use std::ffi::{c_int, c_void};
use vl_ffi::{to_foreign, ForeignBuffer, TypeTag};

const INIT_KMEANS: c_int = 0;
const INIT_RAND: c_int = 1;

#[derive(Clone)]
struct MockGmm {
    data_type: TypeTag,
    dimension: VlSize,
    num_clusters: VlSize,
    means: ForeignBuffer,
    covariances: ForeignBuffer,
    priors: ForeignBuffer,
    posteriors: ForeignBuffer,
    num_data: VlSize,
    loglikelihood: f64,
    num_repetitions: VlSize,
    max_num_iterations: VlSize,
    verbosity: c_int,
    initialization: c_int,
    kmeans_init: *mut VlKMeans,
    owns_kmeans: bool,
    lower_bounds: Vec<f64>,
}

impl MockGmm {
    fn points(&self, data: *const c_void, num_data: VlSize) -> Vec<f64> {
        unsafe { read_f64(data, num_data * self.dimension, self.data_type) }
    }

    fn set_means(&mut self, means: &[f64]) {
        self.means = to_foreign(means, self.data_type);
    }

    unsafe fn seed_with_kmeans(&mut self, data: *const c_void, num_data: VlSize, kmeans: *mut VlKMeans) {
        let km = unsafe { object::<MockKMeans, _>(kmeans) };
        unsafe { km.seed(data, self.dimension, num_data, self.num_clusters) };
        let centers: Vec<f64> = km.centers.to_vec();
        self.set_means(&centers);
    }

    fn em(&mut self, points: &[f64]) -> f64 {
        let (dim, k) = (self.dimension, self.num_clusters);
        let num_data = points.len() / dim;
        let mut means: Vec<f64> = self.means.to_vec();
        let mut covariances: Vec<f64> = self.covariances.to_vec();
        let mut priors: Vec<f64> = self.priors.to_vec();
        let mut posteriors = vec![0.0; k * num_data];
        let mut sums = vec![0.0; k * dim];
        let mut counts = vec![0usize; k];
        let mut loglikelihood = 0.0;

        let assignments: Vec<usize> = points
            .chunks(dim)
            .enumerate()
            .map(|(i, point)| {
                let (c, d) = nearest(point, &means, dim);
                posteriors[i * k + c] = 1.0;
                counts[c] += 1;
                for (sum, x) in sums[c * dim..(c + 1) * dim].iter_mut().zip(point) {
                    *sum += x;
                }
                loglikelihood -= d;
                c
            })
            .collect();

        for c in (0..k).filter(|&c| counts[c] > 0) {
            let n = counts[c] as f64;
            priors[c] = n / num_data as f64;
            for j in 0..dim {
                means[c * dim + j] = sums[c * dim + j] / n;
            }
        }
        let mut variances = vec![0.0; k * dim];
        for (point, &c) in points.chunks(dim).zip(&assignments) {
            for j in 0..dim {
                let diff = point[j] - means[c * dim + j];
                variances[c * dim + j] += diff * diff / counts[c] as f64;
            }
        }
        for c in (0..k).filter(|&c| counts[c] > 0) {
            for j in 0..dim {
                covariances[c * dim + j] = variances[c * dim + j].max(self.lower_bounds[j]);
            }
        }

        self.set_means(&means);
        self.covariances = to_foreign(&covariances, self.data_type);
        self.priors = to_foreign(&priors, self.data_type);
        self.posteriors = to_foreign(&posteriors, self.data_type);
        self.num_data = num_data;
        self.loglikelihood = loglikelihood;
        loglikelihood
    }
}

fn get<'a>(raw: *const VlGMM) -> &'a mut MockGmm {
    unsafe { object(raw) }
}

unsafe extern "C" fn new(data_type: VlType, dimension: VlSize, num_clusters: VlSize) -> *mut VlGMM {
    let Ok(data_type) = TypeTag::from_id(data_type) else {
        return std::ptr::null_mut();
    };
    let size = dimension * num_clusters;
    alloc(
        "gmm",
        MockGmm {
            data_type,
            dimension,
            num_clusters,
            means: ForeignBuffer::zeroed(data_type, size),
            covariances: to_foreign(&vec![1.0f64; size], data_type),
            priors: to_foreign(&vec![1.0 / num_clusters as f64; num_clusters], data_type),
            posteriors: ForeignBuffer::zeroed(data_type, 0),
            num_data: 0,
            loglikelihood: 0.0,
            num_repetitions: 1,
            max_num_iterations: 50,
            verbosity: 0,
            initialization: INIT_KMEANS,
            kmeans_init: std::ptr::null_mut(),
            owns_kmeans: false,
            lower_bounds: vec![1e-6; dimension],
        },
    )
}

unsafe extern "C" fn new_copy(raw: *const VlGMM) -> *mut VlGMM {
    let mut copy = get(raw).clone();
    if !copy.kmeans_init.is_null() {
        copy.kmeans_init = unsafe { (super::kmeans::API.vl_kmeans_new_copy)(copy.kmeans_init) };
        copy.owns_kmeans = true;
    }
    alloc("gmm", copy)
}

unsafe extern "C" fn delete(raw: *mut VlGMM) {
    let gmm = get(raw);
    if gmm.owns_kmeans {
        unsafe { (super::kmeans::API.vl_kmeans_delete)(gmm.kmeans_init) };
    }
    unsafe { free::<MockGmm, _>(raw) };
}

unsafe extern "C" fn reset(raw: *mut VlGMM) {
    let gmm = get(raw);
    gmm.posteriors = ForeignBuffer::zeroed(gmm.data_type, 0);
    gmm.num_data = 0;
    gmm.loglikelihood = 0.0;
}

unsafe extern "C" fn cluster(raw: *mut VlGMM, data: *const c_void, num_data: VlSize) -> f64 {
    let gmm = get(raw);
    let points = gmm.points(data, num_data);
    match gmm.initialization {
        INIT_KMEANS if gmm.kmeans_init.is_null() => unsafe {
            let kmeans = (super::kmeans::API.vl_kmeans_new)(gmm.data_type.id(), 1);
            gmm.seed_with_kmeans(data, num_data, kmeans);
            (super::kmeans::API.vl_kmeans_delete)(kmeans);
        },
        INIT_KMEANS => unsafe { gmm.seed_with_kmeans(data, num_data, gmm.kmeans_init) },
        INIT_RAND => gmm.set_means(&points[..gmm.dimension * gmm.num_clusters]),
        _ => {}
    }
    gmm.em(&points)
}

unsafe extern "C" fn init_with_rand_data(raw: *mut VlGMM, data: *const c_void, num_data: VlSize) {
    let gmm = get(raw);
    let points = gmm.points(data, num_data);
    gmm.set_means(&points[..gmm.dimension * gmm.num_clusters]);
}

unsafe extern "C" fn init_with_kmeans(raw: *mut VlGMM, data: *const c_void, num_data: VlSize, kmeans: *mut VlKMeans) {
    unsafe { get(raw).seed_with_kmeans(data, num_data, kmeans) };
}

unsafe extern "C" fn em(raw: *mut VlGMM, data: *const c_void, num_data: VlSize) -> f64 {
    let gmm = get(raw);
    let points = gmm.points(data, num_data);
    gmm.em(&points)
}

unsafe extern "C" fn set_means(raw: *mut VlGMM, means: *const c_void) {
    let gmm = get(raw);
    gmm.means = unsafe { ForeignBuffer::copy_from_raw(means, gmm.dimension * gmm.num_clusters, gmm.data_type) };
}

unsafe extern "C" fn set_covariances(raw: *mut VlGMM, covariances: *const c_void) {
    let gmm = get(raw);
    gmm.covariances = unsafe { ForeignBuffer::copy_from_raw(covariances, gmm.dimension * gmm.num_clusters, gmm.data_type) };
}

unsafe extern "C" fn set_priors(raw: *mut VlGMM, priors: *const c_void) {
    let gmm = get(raw);
    gmm.priors = unsafe { ForeignBuffer::copy_from_raw(priors, gmm.num_clusters, gmm.data_type) };
}

unsafe extern "C" fn set_num_repetitions(raw: *mut VlGMM, value: VlSize) {
    get(raw).num_repetitions = value;
}

unsafe extern "C" fn set_max_num_iterations(raw: *mut VlGMM, value: VlSize) {
    get(raw).max_num_iterations = value;
}

unsafe extern "C" fn set_verbosity(raw: *mut VlGMM, value: c_int) {
    get(raw).verbosity = value;
}

unsafe extern "C" fn set_initialization(raw: *mut VlGMM, value: c_int) {
    get(raw).initialization = value;
}

unsafe extern "C" fn set_kmeans_init_object(raw: *mut VlGMM, kmeans: *mut VlKMeans) {
    let gmm = get(raw);
    if gmm.owns_kmeans {
        unsafe { (super::kmeans::API.vl_kmeans_delete)(gmm.kmeans_init) };
    }
    gmm.kmeans_init = kmeans;
    gmm.owns_kmeans = false;
}

unsafe extern "C" fn set_covariance_lower_bounds(raw: *mut VlGMM, bounds: *const f64) {
    let gmm = get(raw);
    gmm.lower_bounds = unsafe { read_vec(bounds, gmm.dimension) };
}

unsafe extern "C" fn set_covariance_lower_bound(raw: *mut VlGMM, bound: f64) {
    get(raw).lower_bounds.fill(bound);
}

unsafe extern "C" fn get_means(raw: *const VlGMM) -> *const c_void {
    get(raw).means.as_ptr()
}

unsafe extern "C" fn get_covariances(raw: *const VlGMM) -> *const c_void {
    get(raw).covariances.as_ptr()
}

unsafe extern "C" fn get_priors(raw: *const VlGMM) -> *const c_void {
    get(raw).priors.as_ptr()
}

unsafe extern "C" fn get_posteriors(raw: *const VlGMM) -> *const c_void {
    get(raw).posteriors.as_ptr()
}

unsafe extern "C" fn get_data_type(raw: *const VlGMM) -> VlType {
    get(raw).data_type.id()
}

unsafe extern "C" fn get_dimension(raw: *const VlGMM) -> VlSize {
    get(raw).dimension
}

unsafe extern "C" fn get_num_repetitions(raw: *const VlGMM) -> VlSize {
    get(raw).num_repetitions
}

unsafe extern "C" fn get_num_data(raw: *const VlGMM) -> VlSize {
    get(raw).num_data
}

unsafe extern "C" fn get_num_clusters(raw: *const VlGMM) -> VlSize {
    get(raw).num_clusters
}

unsafe extern "C" fn get_loglikelihood(raw: *const VlGMM) -> f64 {
    get(raw).loglikelihood
}

unsafe extern "C" fn get_verbosity(raw: *const VlGMM) -> c_int {
    get(raw).verbosity
}

unsafe extern "C" fn get_max_num_iterations(raw: *const VlGMM) -> VlSize {
    get(raw).max_num_iterations
}

unsafe extern "C" fn get_initialization(raw: *const VlGMM) -> c_int {
    get(raw).initialization
}

unsafe extern "C" fn get_covariance_lower_bounds(raw: *const VlGMM) -> *const f64 {
    get(raw).lower_bounds.as_ptr()
}

pub(crate) const API: GmmApi = GmmApi {
    vl_gmm_new: new,
    vl_gmm_new_copy: new_copy,
    vl_gmm_delete: delete,
    vl_gmm_reset: reset,
    vl_gmm_cluster: cluster,
    vl_gmm_init_with_rand_data: init_with_rand_data,
    vl_gmm_init_with_kmeans: init_with_kmeans,
    vl_gmm_em: em,
    vl_gmm_set_means: set_means,
    vl_gmm_set_covariances: set_covariances,
    vl_gmm_set_priors: set_priors,
    vl_gmm_set_num_repetitions: set_num_repetitions,
    vl_gmm_set_max_num_iterations: set_max_num_iterations,
    vl_gmm_set_verbosity: set_verbosity,
    vl_gmm_set_initialization: set_initialization,
    vl_gmm_set_kmeans_init_object: set_kmeans_init_object,
    vl_gmm_set_covariance_lower_bounds: set_covariance_lower_bounds,
    vl_gmm_set_covariance_lower_bound: set_covariance_lower_bound,
    vl_gmm_get_means: get_means,
    vl_gmm_get_covariances: get_covariances,
    vl_gmm_get_priors: get_priors,
    vl_gmm_get_posteriors: get_posteriors,
    vl_gmm_get_data_type: get_data_type,
    vl_gmm_get_dimension: get_dimension,
    vl_gmm_get_num_repetitions: get_num_repetitions,
    vl_gmm_get_num_data: get_num_data,
    vl_gmm_get_num_clusters: get_num_clusters,
    vl_gmm_get_loglikelihood: get_loglikelihood,
    vl_gmm_get_verbosity: get_verbosity,
    vl_gmm_get_max_num_iterations: get_max_num_iterations,
    vl_gmm_get_initialization: get_initialization,
    vl_gmm_get_covariance_lower_bounds: get_covariance_lower_bounds,
};
