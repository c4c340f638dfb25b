//! Evaluation of single node FMMs
use tracing::info;

use crate::{
    fmm::{
        helpers::optionally_time,
        types::{Fmm, UpDownPass},
    },
    traits::{
        fmm::Evaluate,
        kernel::Kernel,
        types::{FmmOperatorTime, FmmOperatorType, FmmResult},
    },
    tree::{helpers::init_target, types::Body},
};

impl<K: Kernel> Fmm<K> {
    /// Upward pass over the sources, traversal, then downward pass over the targets, overwriting
    /// previous results.
    pub fn evaluate(&mut self) -> FmmResult<()> {
        let build_times = self
            .times
            .iter()
            .filter(|t| t.operator == FmmOperatorType::Build)
            .copied()
            .collect::<Vec<_>>();
        self.times = build_times;

        let n = self.kernel.n_coefficients();
        let pass = UpDownPass::new(&self.kernel, self.config.timed);

        init_target(&mut self.target.bodies);
        self.target.reset_counters();

        let stats = match self.source.as_mut() {
            Some(source) => {
                self.times.extend(pass.upward_pass(source));
                self.target.reset_expansions(n);
                let (stats, duration) = optionally_time(self.config.timed, || {
                    self.traversal.traverse(&mut self.target, &*source, &self.kernel)
                });
                if let Some(d) = duration {
                    self.times
                        .push(FmmOperatorTime::from_duration(FmmOperatorType::Traversal, d));
                }
                stats?
            }
            None => {
                self.times.extend(pass.upward_pass(&mut self.target));
                let (stats, duration) = optionally_time(self.config.timed, || {
                    self.traversal.traverse_self(&mut self.target, &self.kernel)
                });
                if let Some(d) = duration {
                    self.times
                        .push(FmmOperatorTime::from_duration(FmmOperatorType::Traversal, d));
                }
                stats?
            }
        };

        self.times.extend(pass.downward_pass(&mut self.target));
        self.stats = stats;

        info!(
            n_near = stats.n_near,
            n_far = stats.n_far,
            n_p2p_pairs = stats.n_p2p_pairs,
            "evaluated fmm"
        );
        Ok(())
    }

    /// Target bodies in tree order, holding the results of the last evaluation.
    pub fn bodies(&self) -> &[Body<K::T>] {
        &self.target.bodies
    }

    /// Operator times, empty unless timing was requested.
    pub fn times(&self) -> &[FmmOperatorTime] {
        &self.times
    }

    /// Direct summation at a set of targets over all sources, using the same periodic images.
    ///
    /// # Arguments
    /// * `targets` - Targets, accumulated into.
    pub fn direct(&self, targets: &mut [Body<K::T>]) {
        let sources = self.source.as_ref().unwrap_or(&self.target);
        self.traversal.direct(targets, &sources.bodies, &self.kernel);
    }
}

impl<K: Kernel> Evaluate for Fmm<K> {
    type Scalar = K::T;

    fn evaluate(&mut self) -> FmmResult<()> {
        Fmm::evaluate(self)
    }

    fn bodies(&self) -> &[Body<K::T>] {
        Fmm::bodies(self)
    }

    fn times(&self) -> &[FmmOperatorTime] {
        Fmm::times(self)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        fmm::{
            types::{Equation, FmmConfig, SingleNodeBuilder},
            verify::Verify,
        },
        kernel::{BiotSavart3d, Helmholtz3d, Laplace3d},
        traits::general::Scalar,
        tree::helpers::{init_bodies, sample_bodies, separate_sources, Distribution},
    };

    use super::*;

    fn build<T: Scalar, K: Kernel<T = T>>(
        bodies: Vec<Body<T>>,
        sources: Option<Vec<Body<T>>>,
        config: FmmConfig<T>,
        kernel: K,
    ) -> Fmm<K> {
        let mut builder = SingleNodeBuilder::new().bodies(bodies).unwrap();
        if let Some(sources) = sources {
            builder = builder.sources(sources).unwrap();
        }
        builder.parameters(config, kernel).unwrap().build().unwrap()
    }

    fn check<T: Scalar, K: Kernel<T = T>>(fmm: &Fmm<K>, threshold: f64) -> (f64, f64) {
        let approx = sample_bodies(fmm.bodies(), 100);
        let mut exact = approx.clone();
        init_target(&mut exact);
        fmm.direct(&mut exact);
        Verify::check(&approx, &exact, threshold).unwrap()
    }

    #[test]
    fn test_laplace() {
        let bodies = init_bodies::<f64>(1000, Distribution::Cube, 0, 0, 1);
        let config = FmmConfig {
            timed: true,
            ..Default::default()
        };
        let mut fmm = build(bodies, None, config, Laplace3d::new(config.expansion_order));
        fmm.evaluate().unwrap();

        check(&fmm, 1e-3);
        assert!(fmm.stats.n_far > 0);
        assert!(fmm.times().iter().any(|t| t.operator == FmmOperatorType::Traversal));
        assert!(fmm.times().iter().any(|t| t.operator == FmmOperatorType::L2P));

        // Evaluation overwrites previous results.
        let first = fmm.bodies().to_vec();
        fmm.evaluate().unwrap();
        assert_eq!(first, fmm.bodies());
        assert_eq!(
            fmm.times()
                .iter()
                .filter(|t| t.operator == FmmOperatorType::Build)
                .count(),
            1
        );
    }

    #[test]
    fn test_biot_savart() {
        let bodies = init_bodies::<f64>(1000, Distribution::Plummer, 1, 0, 1);
        let config = FmmConfig::<f64>::default();
        let mut fmm = build(bodies, None, config, BiotSavart3d::new(config.expansion_order));
        fmm.evaluate().unwrap();
        check(&fmm, 1e-3);
    }

    #[test]
    fn test_helmholtz() {
        let bodies = init_bodies::<f64>(600, Distribution::Cube, 5, 0, 1);
        let config = FmmConfig {
            equation: Equation::Helmholtz,
            expansion_order: 8,
            ..Default::default()
        };
        let kernel = Helmholtz3d::new(config.expansion_order, config.wavenumber);
        let mut fmm = build(bodies, None, config, kernel);
        fmm.evaluate().unwrap();
        check(&fmm, 5e-3);
        assert!(fmm.stats.n_far > 0);
    }

    #[test]
    fn test_separate_sources() {
        let mut targets = init_bodies::<f64>(500, Distribution::Cube, 2, 0, 1);
        let mut sources = init_bodies::<f64>(700, Distribution::Cube, 3, 0, 1);
        separate_sources(&mut targets, &mut sources);

        let config = FmmConfig::<f64>::default();
        let mut fmm = build(
            targets,
            Some(sources),
            config,
            Laplace3d::new(config.expansion_order),
        );
        fmm.evaluate().unwrap();
        check(&fmm, 1e-3);
    }

    #[test]
    fn test_f32() {
        let bodies = init_bodies::<f32>(500, Distribution::Sphere, 4, 0, 1);
        let config = FmmConfig {
            expansion_order: 6,
            ..Default::default()
        };
        let mut fmm = build(bodies, None, config, Laplace3d::new(config.expansion_order));
        fmm.evaluate().unwrap();
        check(&fmm, 1e-2);
    }
}
