//! Mock `vl_kmeans_*`: centers are the first points of the data set.

use super::{alloc, free, nearest, object, read_f64, write_buffer, write_slice};
use crate::kmeans::{KMeansApi, VlKMeans};
use crate::sys::{VlSize, VlType};
use std::ffi::{c_int, c_void};
use vl_ffi::{to_foreign, ForeignBuffer, TypeTag};

const KIND: &str = "kmeans";

#[derive(Clone)]
pub(crate) struct MockKMeans {
    pub(crate) data_type: TypeTag,
    distance: c_int,
    algorithm: c_int,
    initialization: c_int,
    num_repetitions: VlSize,
    max_num_iterations: VlSize,
    min_energy_variation: f64,
    max_num_comparisons: VlSize,
    num_trees: VlSize,
    verbosity: c_int,
    pub(crate) dimension: VlSize,
    energy: f64,
    pub(crate) centers: ForeignBuffer,
}

impl MockKMeans {
    pub(crate) fn num_centers(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.centers.len() / self.dimension
        }
    }

    fn centers_f64(&self) -> Vec<f64> {
        self.centers.to_vec()
    }

    fn energy_of(&self, data: &[f64]) -> f64 {
        let centers = self.centers_f64();
        data.chunks(self.dimension)
            .map(|point| nearest(point, &centers, self.dimension).1)
            .sum()
    }

    /// Seed with the first `num_centers` rows.
    pub(crate) unsafe fn seed(&mut self, data: *const c_void, dimension: VlSize, num_data: VlSize, num_centers: VlSize) -> Vec<f64> {
        let points = unsafe { read_f64(data, dimension * num_data, self.data_type) };
        self.dimension = dimension;
        self.centers = to_foreign(&points[..dimension * num_centers], self.data_type);
        points
    }
}

fn get<'a>(raw: *const VlKMeans) -> &'a mut MockKMeans {
    unsafe { object(raw) }
}

/// Verbosity the mock object was given.
pub(crate) fn verbosity_of(raw: *mut VlKMeans) -> c_int {
    get(raw).verbosity
}

unsafe extern "C" fn new(data_type: VlType, distance: c_int) -> *mut VlKMeans {
    let Ok(data_type) = TypeTag::from_id(data_type) else {
        return std::ptr::null_mut();
    };
    alloc(
        KIND,
        MockKMeans {
            data_type,
            distance,
            algorithm: 0,
            initialization: 0,
            num_repetitions: 1,
            max_num_iterations: 100,
            min_energy_variation: 0.0,
            max_num_comparisons: 100,
            num_trees: 1,
            verbosity: 0,
            dimension: 0,
            energy: 0.0,
            centers: ForeignBuffer::zeroed(data_type, 0),
        },
    )
}

unsafe extern "C" fn new_copy(kmeans: *const VlKMeans) -> *mut VlKMeans {
    let copy = get(kmeans).clone();
    alloc(KIND, copy)
}

unsafe extern "C" fn delete(kmeans: *mut VlKMeans) {
    unsafe { free::<MockKMeans, _>(kmeans) };
}

unsafe extern "C" fn reset(kmeans: *mut VlKMeans) {
    let km = get(kmeans);
    km.centers = ForeignBuffer::zeroed(km.data_type, 0);
    km.dimension = 0;
    km.energy = 0.0;
}

unsafe extern "C" fn cluster(
    kmeans: *mut VlKMeans,
    data: *const c_void,
    dimension: VlSize,
    num_data: VlSize,
    num_centers: VlSize,
) -> f64 {
    let km = get(kmeans);
    let points = unsafe { km.seed(data, dimension, num_data, num_centers) };
    km.energy = km.energy_of(&points);
    km.energy
}

unsafe extern "C" fn quantize(
    kmeans: *const VlKMeans,
    assignments: *mut u32,
    distances: *mut c_void,
    data: *const c_void,
    num_data: VlSize,
) {
    let km = get(kmeans);
    let centers = km.centers_f64();
    let points = unsafe { read_f64(data, km.dimension * num_data, km.data_type) };
    let mut dist = Vec::with_capacity(num_data);
    let mut assign = Vec::with_capacity(num_data);
    for point in points.chunks(km.dimension) {
        let (index, d) = nearest(point, &centers, km.dimension);
        assign.push(u32::try_from(index).unwrap_or(u32::MAX));
        dist.push(d);
    }
    unsafe {
        write_slice(assignments, &assign);
        write_buffer(distances, &to_foreign(&dist, km.data_type));
    }
}

unsafe extern "C" fn set_centers(kmeans: *mut VlKMeans, centers: *const c_void, dimension: VlSize, num_centers: VlSize) {
    let km = get(kmeans);
    let values = unsafe { read_f64(centers, dimension * num_centers, km.data_type) };
    km.dimension = dimension;
    km.centers = to_foreign(&values, km.data_type);
}

unsafe extern "C" fn init_centers(
    kmeans: *mut VlKMeans,
    data: *const c_void,
    dimension: VlSize,
    num_data: VlSize,
    num_centers: VlSize,
) {
    unsafe { get(kmeans).seed(data, dimension, num_data, num_centers) };
}

unsafe extern "C" fn refine_centers(kmeans: *mut VlKMeans, data: *const c_void, num_data: VlSize) -> f64 {
    let km = get(kmeans);
    let points = unsafe { read_f64(data, km.dimension * num_data, km.data_type) };
    km.energy = km.energy_of(&points);
    km.energy
}

unsafe extern "C" fn get_distance(kmeans: *const VlKMeans) -> c_int {
    get(kmeans).distance
}

unsafe extern "C" fn get_algorithm(kmeans: *const VlKMeans) -> c_int {
    get(kmeans).algorithm
}

unsafe extern "C" fn get_initialization(kmeans: *const VlKMeans) -> c_int {
    get(kmeans).initialization
}

unsafe extern "C" fn get_num_repetitions(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).num_repetitions
}

unsafe extern "C" fn get_dimension(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).dimension
}

unsafe extern "C" fn get_num_centers(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).num_centers()
}

unsafe extern "C" fn get_max_num_iterations(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).max_num_iterations
}

unsafe extern "C" fn get_min_energy_variation(kmeans: *const VlKMeans) -> f64 {
    get(kmeans).min_energy_variation
}

unsafe extern "C" fn get_max_num_comparisons(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).max_num_comparisons
}

unsafe extern "C" fn get_num_trees(kmeans: *const VlKMeans) -> VlSize {
    get(kmeans).num_trees
}

unsafe extern "C" fn get_energy(kmeans: *const VlKMeans) -> f64 {
    get(kmeans).energy
}

unsafe extern "C" fn get_centers(kmeans: *const VlKMeans) -> *const c_void {
    get(kmeans).centers.as_ptr()
}

unsafe extern "C" fn set_algorithm(kmeans: *mut VlKMeans, value: c_int) {
    get(kmeans).algorithm = value;
}

unsafe extern "C" fn set_initialization(kmeans: *mut VlKMeans, value: c_int) {
    get(kmeans).initialization = value;
}

unsafe extern "C" fn set_num_repetitions(kmeans: *mut VlKMeans, value: VlSize) {
    get(kmeans).num_repetitions = value;
}

unsafe extern "C" fn set_max_num_iterations(kmeans: *mut VlKMeans, value: VlSize) {
    get(kmeans).max_num_iterations = value;
}

unsafe extern "C" fn set_min_energy_variation(kmeans: *mut VlKMeans, value: f64) {
    get(kmeans).min_energy_variation = value;
}

unsafe extern "C" fn set_verbosity(kmeans: *mut VlKMeans, value: c_int) {
    get(kmeans).verbosity = value;
}

unsafe extern "C" fn set_max_num_comparisons(kmeans: *mut VlKMeans, value: VlSize) {
    get(kmeans).max_num_comparisons = value;
}

unsafe extern "C" fn set_num_trees(kmeans: *mut VlKMeans, value: VlSize) {
    get(kmeans).num_trees = value;
}

pub(crate) const API: KMeansApi = KMeansApi {
    vl_kmeans_new: new,
    vl_kmeans_new_copy: new_copy,
    vl_kmeans_delete: delete,
    vl_kmeans_reset: reset,
    vl_kmeans_cluster: cluster,
    vl_kmeans_quantize: quantize,
    vl_kmeans_set_centers: set_centers,
    vl_kmeans_init_centers_with_rand_data: init_centers,
    vl_kmeans_init_centers_plus_plus: init_centers,
    vl_kmeans_refine_centers: refine_centers,
    vl_kmeans_get_distance: get_distance,
    vl_kmeans_get_algorithm: get_algorithm,
    vl_kmeans_get_initialization: get_initialization,
    vl_kmeans_get_num_repetitions: get_num_repetitions,
    vl_kmeans_get_dimension: get_dimension,
    vl_kmeans_get_num_centers: get_num_centers,
    vl_kmeans_get_max_num_iterations: get_max_num_iterations,
    vl_kmeans_get_min_energy_variation: get_min_energy_variation,
    vl_kmeans_get_max_num_comparisons: get_max_num_comparisons,
    vl_kmeans_get_num_trees: get_num_trees,
    vl_kmeans_get_energy: get_energy,
    vl_kmeans_get_centers: get_centers,
    vl_kmeans_set_algorithm: set_algorithm,
    vl_kmeans_set_initialization: set_initialization,
    vl_kmeans_set_num_repetitions: set_num_repetitions,
    vl_kmeans_set_max_num_iterations: set_max_num_iterations,
    vl_kmeans_set_min_energy_variation: set_min_energy_variation,
    vl_kmeans_set_verbosity: set_verbosity,
    vl_kmeans_set_max_num_comparisons: set_max_num_comparisons,
    vl_kmeans_set_num_trees: set_num_trees,
};
