//! Builder objects to construct FMMs
use std::time::Instant;

use tracing::info;

use crate::{
    fmm::types::{Fmm, FmmConfig, SingleNodeBuilder, Traversal, TraversalStats},
    traits::{
        general::Scalar,
        kernel::Kernel,
        types::{FmmError, FmmOperatorTime, FmmOperatorType, FmmResult},
    },
    tree::{
        builder::OctreeBuilder,
        types::{Body, Bounds},
    },
};

impl<T, K> Default for SingleNodeBuilder<T, K>
where
    T: Scalar,
    K: Kernel<T = T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> SingleNodeBuilder<T, K>
where
    T: Scalar,
    K: Kernel<T = T>,
{
    /// Initialise an empty FMM builder
    pub fn new() -> Self {
        Self {
            bodies: None,
            sources: None,
            config: None,
            kernel: None,
        }
    }

    /// Associate the builder with target bodies, which are also the sources unless separate sources
    /// are given.
    ///
    /// # Arguments
    /// * `bodies` - Target bodies, at least one.
    pub fn bodies(mut self, bodies: Vec<Body<T>>) -> FmmResult<Self> {
        if bodies.is_empty() {
            return Err(FmmError::Config("No bodies given".to_string()));
        }
        self.bodies = Some(bodies);
        Ok(self)
    }

    /// Evaluate the field of a separate set of source bodies at the targets.
    ///
    /// # Arguments
    /// * `sources` - Source bodies, at least one.
    pub fn sources(mut self, sources: Vec<Body<T>>) -> FmmResult<Self> {
        if sources.is_empty() {
            return Err(FmmError::Config("No source bodies given".to_string()));
        }
        self.sources = Some(sources);
        Ok(self)
    }

    /// Set run time parameters and the kernel.
    ///
    /// # Arguments
    /// * `config` - Run time parameters, validated here.
    /// * `kernel` - Kernel, whose expansion order must match the parameters.
    pub fn parameters(mut self, config: FmmConfig<T>, kernel: K) -> FmmResult<Self> {
        config.validate()?;
        if kernel.expansion_order() != config.expansion_order {
            return Err(FmmError::Config(format!(
                "Kernel expansion order {} does not match configured order {}",
                kernel.expansion_order(),
                config.expansion_order
            )));
        }
        self.config = Some(config);
        self.kernel = Some(kernel);
        Ok(self)
    }

    /// Build the trees of the FMM.
    pub fn build(self) -> FmmResult<Fmm<K>> {
        let (Some(mut bodies), Some(config), Some(kernel)) = (self.bodies, self.config, self.kernel)
        else {
            return Err(FmmError::Config(
                "Must set bodies and parameters before building".to_string(),
            ));
        };

        let start = Instant::now();
        let tree_builder = OctreeBuilder::new(config.ncrit, config.nspawn);

        let bounds = match self.sources.as_ref() {
            Some(sources) => Bounds::from_bodies_merged(sources, Bounds::from_bodies(&bodies)),
            None => Bounds::from_bodies(&bodies),
        };

        let mut buffer = bodies.clone();
        let target = tree_builder.build(&mut bodies, &mut buffer, &bounds)?;

        let source = match self.sources {
            Some(mut sources) => {
                let mut buffer = sources.clone();
                Some(tree_builder.build(&mut sources, &mut buffer, &bounds)?)
            }
            None => None,
        };

        let mut times = Vec::new();
        if config.timed {
            times.push(FmmOperatorTime::from_instant(FmmOperatorType::Build, start));
        }

        info!(
            n_targets = target.bodies.len(),
            n_sources = source.as_ref().map_or(target.bodies.len(), |s| s.bodies.len()),
            n_cells = target.cells.len(),
            depth = target.depth(),
            "built fmm"
        );

        Ok(Fmm {
            traversal: Traversal::from_config(&config),
            config,
            kernel,
            bounds,
            target,
            source,
            stats: TraversalStats::default(),
            times,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{
        kernel::Laplace3d,
        tree::helpers::{init_bodies, Distribution},
    };

    use super::*;

    #[test]
    fn test_builder_errors() {
        let builder = SingleNodeBuilder::<f64, Laplace3d<f64>>::new();
        assert!(matches!(builder.bodies(Vec::new()), Err(FmmError::Config(_))));

        let bodies = init_bodies::<f64>(10, Distribution::Cube, 0, 0, 1);
        let config = FmmConfig::<f64>::default();

        let mismatched = SingleNodeBuilder::new()
            .bodies(bodies.clone())
            .unwrap()
            .parameters(config, Laplace3d::new(config.expansion_order + 1));
        assert!(matches!(mismatched, Err(FmmError::Config(_))));

        let invalid = SingleNodeBuilder::new().bodies(bodies.clone()).unwrap().parameters(
            FmmConfig {
                ncrit: 0,
                ..config
            },
            Laplace3d::new(config.expansion_order),
        );
        assert!(invalid.is_err());

        let incomplete = SingleNodeBuilder::<f64, Laplace3d<f64>>::new()
            .bodies(bodies)
            .unwrap()
            .build();
        assert!(incomplete.is_err());
    }

    #[test]
    fn test_build_separate_sources() {
        let targets = init_bodies::<f64>(100, Distribution::Cube, 0, 0, 1);
        let sources = init_bodies::<f64>(200, Distribution::Sphere, 1, 0, 1);
        let config = FmmConfig {
            timed: true,
            ..Default::default()
        };

        let fmm = SingleNodeBuilder::new()
            .bodies(targets)
            .unwrap()
            .sources(sources)
            .unwrap()
            .parameters(config, Laplace3d::new(config.expansion_order))
            .unwrap()
            .build()
            .unwrap();

        let source = fmm.source.as_ref().unwrap();
        assert_eq!(fmm.target.bodies.len(), 100);
        assert_eq!(source.bodies.len(), 200);

        // Both trees share the root cube of the merged bounds.
        assert_eq!(fmm.target.cells[0].center, source.cells[0].center);
        assert_eq!(fmm.target.cells[0].radius, source.cells[0].radius);
        assert_eq!(fmm.times.len(), 1);
        assert_eq!(fmm.times[0].operator, FmmOperatorType::Build);
    }
}
