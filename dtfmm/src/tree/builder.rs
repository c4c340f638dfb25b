//! Construction of adaptive octrees
use rayon::prelude::*;
use tracing::{debug, info_span};

use crate::{
    traits::{
        general::Scalar,
        types::{FmmError, FmmResult},
    },
    tree::{
        constants::{MAX_LEVEL, NCHILDREN},
        types::{Body, Bounds, Cell, Octree},
    },
};

/// Builds adaptive octrees over a set of bodies.
#[derive(Clone, Copy, Debug)]
pub struct OctreeBuilder {
    /// Maximum number of bodies per leaf.
    pub ncrit: usize,

    /// Subtrees holding more bodies than this are built as parallel tasks.
    pub nspawn: usize,
}

/// Node of the recursive build, flattened into the cell arena once complete.
struct Node<T: Scalar> {
    center: [T; 3],
    radius: T,
    body_begin: usize,
    n_bodies: usize,
    children: Vec<Node<T>>,
}

/// Octant of a position relative to a center, the x axis in the lowest bit.
#[inline]
fn octant<T: Scalar>(position: &[T; 3], center: &[T; 3]) -> usize {
    (position[0] > center[0]) as usize
        | ((position[1] > center[1]) as usize) << 1
        | ((position[2] > center[2]) as usize) << 2
}

fn child_center<T: Scalar>(center: &[T; 3], radius: T, octant: usize) -> [T; 3] {
    let half = radius / T::of(2.0);
    let mut result = *center;
    for (d, x) in result.iter_mut().enumerate() {
        if octant & (1 << d) != 0 {
            *x += half;
        } else {
            *x -= half;
        }
    }
    result
}

impl OctreeBuilder {
    /// Constructor
    ///
    /// # Arguments
    /// * `ncrit` - Maximum number of bodies per leaf.
    /// * `nspawn` - Threshold number of bodies above which subtrees are built in parallel.
    pub fn new(ncrit: usize, nspawn: usize) -> Self {
        Self { ncrit, nspawn }
    }

    /// Build an octree, reordering bodies so that every cell owns a contiguous range.
    ///
    /// Bodies are reordered in place, and the returned tree holds a copy in the same order.
    /// Expansions are left unallocated.
    ///
    /// # Arguments
    /// * `bodies` - Bodies to sort into the tree.
    /// * `buffer` - Scratch space of the same length as `bodies`.
    /// * `bounds` - Bounds enclosing all bodies, possibly larger than those of `bodies`.
    pub fn build<T: Scalar>(
        &self,
        bodies: &mut [Body<T>],
        buffer: &mut [Body<T>],
        bounds: &Bounds<T>,
    ) -> FmmResult<Octree<T>> {
        let _span = info_span!("build_tree", n_bodies = bodies.len()).entered();

        if buffer.len() != bodies.len() {
            return Err(FmmError::Config(format!(
                "Scratch buffer holds {} bodies, expected {}",
                buffer.len(),
                bodies.len()
            )));
        }
        if self.ncrit == 0 {
            return Err(FmmError::Config("ncrit must be positive".to_string()));
        }

        let (center, radius) = bounds.cube();
        let root = self.build_node(bodies, buffer, 0, center, radius, 0);
        let (cells, levels) = flatten(&root);

        let tree = Octree {
            cells,
            bodies: bodies.to_vec(),
            levels,
            multipoles: Vec::new(),
            locals: Vec::new(),
            n_coefficients: 0,
        };

        tree.check_invariants()?;

        debug!(
            n_cells = tree.cells.len(),
            depth = tree.levels.len(),
            "octree built"
        );

        Ok(tree)
    }

    fn build_node<T: Scalar>(
        &self,
        bodies: &mut [Body<T>],
        buffer: &mut [Body<T>],
        body_begin: usize,
        center: [T; 3],
        radius: T,
        level: u64,
    ) -> Node<T> {
        let n_bodies = bodies.len();
        let mut node = Node {
            center,
            radius,
            body_begin,
            n_bodies,
            children: Vec::new(),
        };

        if n_bodies <= self.ncrit || level >= MAX_LEVEL {
            return node;
        }

        // Bucket bodies by octant through the scratch buffer
        let mut counts = [0usize; NCHILDREN];
        for body in bodies.iter() {
            counts[octant(&body.position, &center)] += 1;
        }

        if counts.iter().any(|&c| c == n_bodies) {
            let first = bodies[0].position;
            if bodies.iter().all(|b| b.position == first) {
                return node;
            }
        }

        let mut offsets = [0usize; NCHILDREN];
        for i in 1..NCHILDREN {
            offsets[i] = offsets[i - 1] + counts[i - 1];
        }
        let mut cursor = offsets;
        for body in bodies.iter() {
            let o = octant(&body.position, &center);
            buffer[cursor[o]] = *body;
            cursor[o] += 1;
        }
        bodies.copy_from_slice(buffer);

        // Split into disjoint slices, one per non empty octant
        let mut tasks = Vec::with_capacity(NCHILDREN);
        let mut bodies_rest = bodies;
        let mut buffer_rest = buffer;
        for (o, &count) in counts.iter().enumerate() {
            let (b, b_rest) = std::mem::take(&mut bodies_rest).split_at_mut(count);
            let (s, s_rest) = std::mem::take(&mut buffer_rest).split_at_mut(count);
            bodies_rest = b_rest;
            buffer_rest = s_rest;
            if count > 0 {
                tasks.push((o, b, s, body_begin + offsets[o]));
            }
        }

        let half = radius / T::of(2.0);
        let build_child = |(o, b, s, begin): (usize, &mut [Body<T>], &mut [Body<T>], usize)| {
            self.build_node(b, s, begin, child_center(&center, radius, o), half, level + 1)
        };

        node.children = if n_bodies > self.nspawn {
            tasks.into_par_iter().map(build_child).collect()
        } else {
            tasks.into_iter().map(build_child).collect()
        };

        node
    }
}

/// Flatten a recursive build into a breadth first cell arena, returning the cells and level ranges.
fn flatten<T: Scalar>(root: &Node<T>) -> (Vec<Cell<T>>, Vec<std::ops::Range<usize>>) {
    let mut cells = Vec::new();
    let mut levels = Vec::new();
    let mut current: Vec<(&Node<T>, usize)> = vec![(root, 0)];
    let mut level = 0;

    while !current.is_empty() {
        let begin = cells.len();
        for &(node, parent) in current.iter() {
            cells.push(Cell {
                center: node.center,
                radius: node.radius,
                level,
                parent,
                child_begin: 0,
                n_children: node.children.len(),
                body_begin: node.body_begin,
                n_bodies: node.n_bodies,
                weight: T::zero(),
                n_near: 0,
                n_far: 0,
            });
        }
        let end = cells.len();
        levels.push(begin..end);

        let mut next = Vec::new();
        for (i, &(node, _)) in current.iter().enumerate() {
            if !node.children.is_empty() {
                cells[begin + i].child_begin = end + next.len();
            }
            for child in node.children.iter() {
                next.push((child, begin + i));
            }
        }

        current = next;
        level += 1;
    }

    (cells, levels)
}
