//! Object picking and selection.
//!
//! Picking turns a pointer position into a semantic part of the model:
//! 1. Unproject the pointer into a world-space ray using the caller's [`Context`]
//! 2. Intersect the ray with every visible instance of the fragment, nearest hit first
//! 3. Read the block id of the hit triangle's first vertex
//! 4. Mirror the hit instance in the fragment's selection overlay
//!
//! Step 3 is a constant-time lookup because the block id is stored per vertex
//! when the parts are merged, so no part boundaries need to be walked.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix, Transform, Vector3, Vector4};

use crate::{context::Context, data_structures::fragment::Fragment, error::Result};

const EPSILON: f32 = 1e-7;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    /// `direction` gets normalized so hit distances are in world units.
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Ray through the pointer position of `ctx`.
    ///
    /// Returns `None` if the camera matrix cannot be inverted.
    pub fn from_screen(ctx: &Context) -> Option<Self> {
        let inverse = ctx.view_proj.invert()?;
        let width = f64::from(ctx.size.width.max(1));
        let height = f64::from(ctx.size.height.max(1));
        let x = (ctx.mouse.coords.x / width * 2.0 - 1.0) as f32;
        let y = (1.0 - ctx.mouse.coords.y / height * 2.0) as f32;
        // wgpu clip space depth runs from 0 (near) to 1 (far)
        let near = inverse * Vector4::new(x, y, 0.0, 1.0);
        let far = inverse * Vector4::new(x, y, 1.0, 1.0);
        if near.w.abs() < EPSILON || far.w.abs() < EPSILON {
            return None;
        }
        let near = Point3::from_homogeneous(near);
        let far = Point3::from_homogeneous(far);
        let direction = far - near;
        if direction.magnitude2() < EPSILON {
            return None;
        }
        Some(Ray::new(near, direction))
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }

    /// The same ray expressed in another space. The direction is not
    /// renormalized, so `t` keeps meaning world distance.
    fn transformed(&self, transform: &Matrix4<f32>) -> Self {
        Self {
            origin: transform.transform_point(self.origin),
            direction: transform.transform_vector(self.direction),
        }
    }

    /// Möller–Trumbore, double sided. Returns the ray parameter of the hit.
    pub fn intersect_triangle(&self, a: Point3<f32>, b: Point3<f32>, c: Point3<f32>) -> Option<f32> {
        let edge1 = b - a;
        let edge2 = c - a;
        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = self.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = edge2.dot(q) * inv_det;
        (t > EPSILON).then_some(t)
    }
}

/// A render-level hit: which triangle of the merged geometry, in which instance slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub triangle_index: usize,
    pub instance_index: usize,
    pub distance: f32,
    pub point: Point3<f32>,
}

/// Intersect `ray` with every drawn, occupied instance of `fragment`.
///
/// Hits are sorted nearest first.
pub fn raycast(fragment: &Fragment, ray: &Ray) -> Vec<Hit> {
    let geometry = fragment.geometry();
    let instances = fragment.instances();
    let positions = geometry.positions();
    let mut hits = Vec::new();

    for (slot, transform, _) in instances
        .iter_active()
        .filter(|(slot, _, _)| *slot < instances.count())
    {
        let Some(inverse) = transform.invert() else {
            log::warn!(
                "Instance {} of fragment '{}' has a singular transform and cannot be picked.",
                slot,
                fragment.id
            );
            continue;
        };
        let local = ray.transformed(&inverse);
        for triangle in 0..geometry.triangle_count() {
            let Some([a, b, c]) = geometry.triangle(triangle) else {
                continue;
            };
            let corner = |i: u32| Point3::from(positions[i as usize]);
            if let Some(t) = local.intersect_triangle(corner(a), corner(b), corner(c)) {
                hits.push(Hit {
                    triangle_index: triangle,
                    instance_index: slot,
                    distance: t,
                    point: ray.at(t),
                });
            }
        }
    }

    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
}

/// Handle a pick event: cast a ray through the pointer, select the nearest hit.
///
/// Returns the picked block id. A miss hides the selection overlay.
pub fn pick_fragment(ctx: &Context, fragment: &mut Fragment) -> Result<Option<u32>> {
    let hit = Ray::from_screen(ctx).and_then(|ray| raycast(fragment, &ray).into_iter().next());
    fragment.on_pick(hit.as_ref())
}

/// Centre of the `triangle` of `fragment` as placed by instance `slot`.
///
/// Handy for aiming rays at a known part.
pub fn triangle_center(fragment: &Fragment, slot: usize, triangle: usize) -> Option<Point3<f32>> {
    let transform = fragment.instances().get_instance(slot).ok()?;
    let [a, b, c] = fragment.geometry().triangle(triangle)?;
    let positions = fragment.geometry().positions();
    let mut sum = Vector3::new(0.0, 0.0, 0.0);
    for i in [a, b, c] {
        sum += Vector3::from(*positions.get(i as usize)?);
    }
    Some(transform.transform_point(Point3::from_vec(sum / 3.0)))
}
