//! Data structures for the dual tree traversal FMM
use std::str::FromStr;

use num_complex::Complex;

use crate::{
    traits::{
        general::Scalar,
        kernel::Kernel,
        types::{FmmError, FmmOperatorTime, FmmResult},
    },
    tree::types::{Body, Bounds, Cell, Octree},
};

/// Kernel selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Equation {
    /// Laplace kernel, potential and its gradient.
    Laplace,
    /// Biot-Savart kernel, velocity induced by vortex particles.
    BiotSavart,
    /// Helmholtz kernel at a real wavenumber, potential and its gradient.
    Helmholtz,
}

impl FromStr for Equation {
    type Err = FmmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "laplace" | "l" => Ok(Equation::Laplace),
            "biot-savart" | "biotsavart" | "b" => Ok(Equation::BiotSavart),
            "helmholtz" | "h" => Ok(Equation::Helmholtz),
            _ => Err(FmmError::Config(format!("Unknown equation '{s}'"))),
        }
    }
}

/// Run time parameters of an FMM, threaded immutably through construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FmmConfig<T: Scalar> {
    /// Opening angle of the multipole acceptance criterion, values outside `(0, 1]` disable
    /// far field approximation entirely.
    pub theta: T,

    /// Maximum number of bodies per leaf.
    pub ncrit: usize,

    /// Threshold number of bodies above which tree construction and traversal spawn parallel tasks.
    pub nspawn: usize,

    /// Number of periodic image shells, zero for a free space problem.
    pub images: usize,

    /// Split both cells of an inadmissible pair when neither is a leaf.
    pub dual: bool,

    /// Order of multipole and local expansions.
    pub expansion_order: usize,

    /// Period of the domain along each axis.
    pub cycle: T,

    /// Kernel selector.
    pub equation: Equation,

    /// Wavenumber of the Helmholtz kernel, unused by the other equations.
    pub wavenumber: T,

    /// Record operator times.
    pub timed: bool,
}

/// Identifies one interacting pair of cells, and the periodic image of the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interaction {
    /// Target cell index.
    pub target: usize,

    /// Source cell index.
    pub source: usize,

    /// Index of the periodic image offset applied to the source.
    pub image: usize,
}

/// Near and far field interactions found by a traversal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InteractionList {
    /// Pairs of leaves evaluated directly.
    pub near: Vec<Interaction>,

    /// Admissible pairs evaluated with multipole to local translations.
    pub far: Vec<Interaction>,
}

/// Counters of a traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Number of near field cell pairs.
    pub n_near: usize,

    /// Number of far field cell pairs.
    pub n_far: usize,

    /// Number of body pairs evaluated directly.
    pub n_p2p_pairs: usize,
}

/// Dual tree traversal, pairing cells of a target and source tree.
#[derive(Clone, Debug)]
pub struct Traversal<T: Scalar> {
    /// Opening angle.
    pub theta: T,

    /// Threshold number of bodies on both sides of a pair above which its subpairs are visited in parallel.
    pub nspawn: usize,

    /// Number of periodic image shells.
    pub images: usize,

    /// Period of the domain.
    pub cycle: T,

    /// Dual recursion.
    pub dual: bool,

    /// Offsets of all periodic images.
    pub offsets: Vec<[T; 3]>,
}

/// Contributions of a traversal to a target tree, grouped per target so that they can be computed
/// in parallel and merged sequentially.
pub struct Contributions<T: Scalar> {
    /// Local coefficients per target cell.
    pub locals: Vec<(usize, Vec<Complex<T>>)>,

    /// Potentials and fields per target leaf.
    pub near: Vec<(usize, Vec<T>, Vec<[T; 3]>)>,

    /// Number of near and far interactions per target cell.
    pub counts: Vec<(usize, usize, usize)>,

    /// Traversal counters.
    pub stats: TraversalStats,
}

/// Upward and downward passes of an FMM over one tree.
pub struct UpDownPass<'a, K: Kernel> {
    /// Kernel providing the translations.
    pub kernel: &'a K,

    /// Record operator times.
    pub timed: bool,
}

/// A single node FMM, over one tree, or over separate target and source trees.
pub struct Fmm<K: Kernel> {
    /// Parameters.
    pub config: FmmConfig<K::T>,

    /// Kernel.
    pub kernel: K,

    /// Bounds of targets and sources together.
    pub bounds: Bounds<K::T>,

    /// Target tree, also the source tree unless separate sources were given.
    pub target: Octree<K::T>,

    /// Separate source tree.
    pub source: Option<Octree<K::T>>,

    /// Traversal.
    pub traversal: Traversal<K::T>,

    /// Counters of the last traversal.
    pub stats: TraversalStats,

    /// Operator times of the last evaluation.
    pub times: Vec<FmmOperatorTime>,
}

/// Builder for single node FMMs.
pub struct SingleNodeBuilder<T: Scalar, K: Kernel<T = T>> {
    /// Target bodies.
    pub bodies: Option<Vec<Body<T>>>,

    /// Separate source bodies.
    pub sources: Option<Vec<Body<T>>>,

    /// Parameters.
    pub config: Option<FmmConfig<T>>,

    /// Kernel.
    pub kernel: Option<K>,
}

/// Stages of a distributed evaluation on one rank, in the order they are passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Bodies are local, local bounds may be computed.
    LocalBoundsReady,
    /// Bounds of all ranks are known.
    GlobalBoundsReduced,
    /// Every body has been assigned a destination rank.
    Partitioned,
    /// Bodies have been exchanged, the local tree can be built.
    BodiesExchanged,
    /// Local essential trees of every peer are complete.
    LetBuilt,
    /// Traversal rounds completed, counted from zero for the local self interaction.
    TraversalRound(usize),
    /// Downward pass complete.
    Done,
}

/// The part of another rank's tree needed to evaluate its interaction with the local tree.
///
/// Cells are copies of the owner's cells. Once a cell is resolved its `child_begin` and `body_begin`
/// index this tree, before that they hold the owner's indices.
#[derive(Clone, Debug, Default)]
pub struct LocalEssentialTree<T: Scalar> {
    /// Owning rank.
    pub rank: usize,

    /// Cells, root at index 0.
    pub cells: Vec<Cell<T>>,

    /// Bodies of resolved leaves.
    pub bodies: Vec<Body<T>>,

    /// Multipole coefficients, `n_coefficients` per cell.
    pub multipoles: Vec<Complex<T>>,

    /// Index of each cell on the owning rank.
    pub remote: Vec<usize>,

    /// Whether the children, or for leaves the bodies, of each cell have been received.
    pub resolved: Vec<bool>,

    /// Number of coefficients per cell.
    pub n_coefficients: usize,
}

/// Answer of an owning rank to a set of LET requests, concatenated in request order.
#[derive(Clone, Debug, Default)]
pub struct LetResponse<T: Scalar> {
    /// Children of each requested internal cell.
    pub cells: Vec<Cell<T>>,

    /// Multipoles of the returned children.
    pub multipoles: Vec<Complex<T>>,

    /// Bodies of each requested leaf.
    pub bodies: Vec<Body<T>>,
}

/// State of one rank of a distributed evaluation, independent of the transport used between ranks.
pub struct RankFmm<K: Kernel> {
    /// Rank of this process.
    pub rank: usize,

    /// Number of ranks.
    pub size: usize,

    /// Parameters.
    pub config: FmmConfig<K::T>,

    /// Kernel.
    pub kernel: K,

    /// Local bodies, reordered into tree order once the tree is built.
    pub bodies: Vec<Body<K::T>>,

    /// Global bounds.
    pub bounds: Bounds<K::T>,

    /// Local tree.
    pub tree: Octree<K::T>,

    /// Local essential trees of every rank, the entry of this rank is unused.
    pub lets: Vec<LocalEssentialTree<K::T>>,

    /// Outstanding requests per peer, as indices into the peer's local essential tree.
    pub pending: Vec<Vec<usize>>,

    /// Traversal.
    pub traversal: Traversal<K::T>,

    /// Current stage.
    pub stage: Stage,

    /// Counters accumulated over all traversal rounds.
    pub stats: TraversalStats,

    /// Operator times.
    pub times: Vec<FmmOperatorTime>,
}

impl<T: Scalar> Default for FmmConfig<T> {
    fn default() -> Self {
        Self {
            theta: T::of(0.4),
            ncrit: 16,
            nspawn: 1000,
            images: 0,
            dual: false,
            expansion_order: 10,
            cycle: T::of(2.0) * T::PI(),
            equation: Equation::Laplace,
            wavenumber: T::one(),
            timed: false,
        }
    }
}

impl<T: Scalar> FmmConfig<T> {
    /// Check parameters before any tree work begins.
    pub fn validate(&self) -> FmmResult<()> {
        if self.ncrit == 0 {
            return Err(FmmError::Config("ncrit must be positive".to_string()));
        }
        if self.expansion_order == 0 {
            return Err(FmmError::Config(
                "expansion order must be positive".to_string(),
            ));
        }
        if !(self.cycle > T::zero()) || !self.cycle.is_finite() {
            return Err(FmmError::Config(format!(
                "cycle must be positive and finite, found {}",
                self.cycle
            )));
        }
        if self.equation == Equation::Helmholtz
            && (!(self.wavenumber > T::zero()) || !self.wavenumber.is_finite())
        {
            return Err(FmmError::Config(format!(
                "wavenumber must be positive and finite, found {}",
                self.wavenumber
            )));
        }
        if !self.theta.is_finite() {
            return Err(FmmError::Config(format!(
                "theta must be finite, found {}",
                self.theta
            )));
        }
        Ok(())
    }
}

impl TraversalStats {
    /// Accumulate the counters of another traversal.
    pub fn merge(&mut self, other: &TraversalStats) {
        self.n_near += other.n_near;
        self.n_far += other.n_far;
        self.n_p2p_pairs += other.n_p2p_pairs;
    }
}

impl InteractionList {
    /// Append the interactions of another list.
    pub fn merge(mut self, other: InteractionList) -> Self {
        self.near.extend(other.near);
        self.far.extend(other.far);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_equation() {
        assert_eq!("laplace".parse::<Equation>().unwrap(), Equation::Laplace);
        assert_eq!("L".parse::<Equation>().unwrap(), Equation::Laplace);
        assert_eq!("b".parse::<Equation>().unwrap(), Equation::BiotSavart);
        assert_eq!(
            "Helmholtz".parse::<Equation>().unwrap(),
            Equation::Helmholtz
        );
        assert!(matches!("x".parse::<Equation>(), Err(FmmError::Config(_))));
    }

    #[test]
    fn test_validate_config() {
        let config = FmmConfig::<f64>::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expansion_order, 10);
        assert!((config.cycle - 2.0 * std::f64::consts::PI).abs() < 1e-15);

        let bad = [
            FmmConfig {
                ncrit: 0,
                ..config
            },
            FmmConfig {
                expansion_order: 0,
                ..config
            },
            FmmConfig {
                cycle: 0.0,
                ..config
            },
            FmmConfig {
                theta: f64::NAN,
                ..config
            },
            FmmConfig {
                equation: Equation::Helmholtz,
                wavenumber: 0.0,
                ..config
            },
        ];
        for c in bad.iter() {
            assert!(matches!(c.validate(), Err(FmmError::Config(_))));
        }

        // Degenerate opening angles are valid, they select direct summation.
        let direct = FmmConfig {
            theta: 0.0,
            ..config
        };
        assert!(direct.validate().is_ok());
    }
}
