//! Mock `vl_scalespace_*`: each level is the image resampled at its
//! octave's step with nearest-pixel lookup, without smoothing.

use super::{alloc, free, object, read_vec};
use crate::scalespace::{ScaleSpaceApi, ScaleSpaceGeometry, ScaleSpaceOctaveGeometry, VlScaleSpace};
use crate::sys::{to_vl_bool, VlBool, VlIndex, VlSize};

#[derive(Clone)]
struct MockScaleSpace {
    geometry: ScaleSpaceGeometry,
    levels: Vec<Vec<f32>>,
}

impl MockScaleSpace {
    fn octave(&self, o: VlIndex) -> ScaleSpaceOctaveGeometry {
        let g = &self.geometry;
        let shrink = |extent: usize| {
            if o >= 0 {
                (extent >> o.unsigned_abs()).max(1)
            } else {
                extent << o.unsigned_abs()
            }
        };
        ScaleSpaceOctaveGeometry {
            width: shrink(g.width),
            height: shrink(g.height),
            step: 2f64.powi(i32::try_from(o).unwrap_or(0)),
        }
    }

    fn level_index(&self, o: VlIndex, s: VlIndex) -> usize {
        let g = &self.geometry;
        let per_octave = (g.octave_last_subdivision - g.octave_first_subdivision + 1).unsigned_abs();
        (o - g.first_octave).unsigned_abs() * per_octave + (s - g.octave_first_subdivision).unsigned_abs()
    }
}

fn get<'a>(raw: *const VlScaleSpace) -> &'a mut MockScaleSpace {
    unsafe { object(raw) }
}

unsafe extern "C" fn get_default_geometry(width: VlSize, height: VlSize) -> ScaleSpaceGeometry {
    let octaves = VlIndex::try_from(width.min(height).max(1).ilog2()).unwrap_or(0);
    ScaleSpaceGeometry {
        width,
        height,
        first_octave: 0,
        last_octave: (octaves - 3).max(0),
        octave_resolution: 3,
        octave_first_subdivision: 0,
        octave_last_subdivision: 2,
        base_scale: 1.6 * 2f64.powf(1.0 / 3.0),
        nominal_scale: 0.5,
    }
}

unsafe extern "C" fn geometry_is_equal(a: ScaleSpaceGeometry, b: ScaleSpaceGeometry) -> VlBool {
    to_vl_bool(a == b)
}

unsafe extern "C" fn new(width: VlSize, height: VlSize) -> *mut VlScaleSpace {
    unsafe { new_with_geometry(get_default_geometry(width, height)) }
}

unsafe extern "C" fn new_with_geometry(geometry: ScaleSpaceGeometry) -> *mut VlScaleSpace {
    alloc(
        "scalespace",
        MockScaleSpace {
            geometry,
            levels: Vec::new(),
        },
    )
}

unsafe extern "C" fn new_copy(raw: *const VlScaleSpace) -> *mut VlScaleSpace {
    alloc("scalespace", get(raw).clone())
}

unsafe extern "C" fn new_shallow_copy(raw: *const VlScaleSpace) -> *mut VlScaleSpace {
    unsafe { new_with_geometry(get(raw).geometry) }
}

unsafe extern "C" fn delete(raw: *mut VlScaleSpace) {
    unsafe { free::<MockScaleSpace, _>(raw) };
}

unsafe extern "C" fn put_image(raw: *mut VlScaleSpace, image: *const f32) {
    let space = get(raw);
    let g = space.geometry;
    let image = unsafe { read_vec(image, g.width * g.height) };
    space.levels.clear();
    for o in g.first_octave..=g.last_octave {
        let octave = space.octave(o);
        let level: Vec<f32> = (0..octave.height)
            .flat_map(|y| (0..octave.width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let ix = ((x as f64 * octave.step) as usize).min(g.width - 1);
                let iy = ((y as f64 * octave.step) as usize).min(g.height - 1);
                image[ix + iy * g.width]
            })
            .collect();
        for _ in g.octave_first_subdivision..=g.octave_last_subdivision {
            space.levels.push(level.clone());
        }
    }
}

unsafe extern "C" fn get_geometry(raw: *const VlScaleSpace) -> ScaleSpaceGeometry {
    get(raw).geometry
}

unsafe extern "C" fn get_octave_geometry(raw: *const VlScaleSpace, o: VlIndex) -> ScaleSpaceOctaveGeometry {
    get(raw).octave(o)
}

unsafe extern "C" fn get_level_const(raw: *const VlScaleSpace, o: VlIndex, s: VlIndex) -> *const f32 {
    let space = get(raw);
    let index = space.level_index(o, s);
    space.levels[index].as_ptr()
}

unsafe extern "C" fn get_level_sigma(raw: *const VlScaleSpace, o: VlIndex, s: VlIndex) -> f64 {
    let g = &get(raw).geometry;
    g.base_scale * 2f64.powf(o as f64 + s as f64 / g.octave_resolution as f64)
}

pub(crate) const API: ScaleSpaceApi = ScaleSpaceApi {
    vl_scalespace_get_default_geometry: get_default_geometry,
    vl_scalespacegeometry_is_equal: geometry_is_equal,
    vl_scalespace_new: new,
    vl_scalespace_new_with_geometry: new_with_geometry,
    vl_scalespace_new_copy: new_copy,
    vl_scalespace_new_shallow_copy: new_shallow_copy,
    vl_scalespace_delete: delete,
    vl_scalespace_put_image: put_image,
    vl_scalespace_get_geometry: get_geometry,
    vl_scalespace_get_octave_geometry: get_octave_geometry,
    vl_scalespace_get_level_const: get_level_const,
    vl_scalespace_get_level_sigma: get_level_sigma,
};
