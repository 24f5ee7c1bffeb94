//! # Noise mechanisms
//!
//! Stateless randomized transforms. Every function takes its random generator
//! explicitly so that each thread (or each test) owns its own generator state.
//!

use super::{
    check_epsilon, check_sensitivity,
    dp_parameters::{MechanismKind, MechanismSpec},
    Error, Result,
};
use rand::{
    distributions::{Distribution, WeightedIndex},
    Rng,
};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Laplace, Normal};

/// The output of a mechanism run on numeric values
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisedOutput {
    /// One noised value per input value
    Noised(Vec<f64>),
    /// The index of the selected candidate
    Selected(usize),
}

/// The standard deviation of the Gaussian mechanism
pub fn gaussian_sigma(epsilon: f64, delta: f64, sensitivity: f64) -> f64 {
    // it can be inf so we clamp the results between 0 and f64::MAX
    ((2. * (1.25_f64 / delta).ln()).sqrt() * sensitivity / epsilon).clamp(0., f64::MAX)
}

/// The scale of the Laplace mechanism
pub fn laplace_scale(epsilon: f64, sensitivity: f64) -> f64 {
    sensitivity / epsilon
}

/// The factor applied to utilities by the exponential mechanism
pub fn exponential_factor(epsilon: f64, sensitivity: f64) -> f64 {
    epsilon / (2. * sensitivity)
}

fn check_scale(scale: f64) -> Result<f64> {
    if scale.is_finite() && scale > 0. {
        Ok(scale)
    } else {
        Err(Error::invalid_parameter(format!(
            "the noise scale must be finite and positive, got {scale}"
        )))
    }
}

/// The noise scale of `spec`: sigma for Gaussian, the Laplace scale for Laplace and
/// Report-Noisy-Max, the utility factor for Exponential
pub fn calibrated_scale(spec: &MechanismSpec) -> Result<f64> {
    check_scale(match spec.kind() {
        MechanismKind::Gaussian => gaussian_sigma(spec.epsilon(), spec.delta(), spec.sensitivity()),
        MechanismKind::Laplace | MechanismKind::ReportNoisyMax => {
            laplace_scale(spec.epsilon(), spec.sensitivity())
        }
        MechanismKind::Exponential => exponential_factor(spec.epsilon(), spec.sensitivity()),
    })
}

fn check_not_empty<T>(values: &[T]) -> Result<()> {
    if values.is_empty() {
        Err(Error::EmptyInput)
    } else {
        Ok(())
    }
}

fn check_finite(scores: &[f64]) -> Result<()> {
    match scores.iter().find(|s| !s.is_finite()) {
        Some(s) => Err(Error::invalid_parameter(format!(
            "scores must be finite, got {s}"
        ))),
        None => Ok(()),
    }
}

/// Add independent Normal(0, sigma) noise to each value
pub fn gaussian<R: Rng + ?Sized>(
    rng: &mut R,
    values: &[f64],
    epsilon: f64,
    delta: f64,
    sensitivity: f64,
) -> Result<Vec<f64>> {
    let spec = MechanismSpec::gaussian(epsilon, delta, sensitivity)?;
    check_not_empty(values)?;
    if spec.epsilon() > 1. {
        // Cf. Theorem A.1. in (Dwork, Roth et al. 2014)
        log::warn!("Warning, epsilon>1 the gaussian mechanism applied will not be exactly epsilon,delta-DP!")
    }
    let normal = Normal::new(0., calibrated_scale(&spec)?)?;
    Ok(add_noise(rng, values, &normal))
}

/// Add independent Laplace(0, sensitivity/epsilon) noise to each value
pub fn laplace<R: Rng + ?Sized>(
    rng: &mut R,
    values: &[f64],
    epsilon: f64,
    sensitivity: f64,
) -> Result<Vec<f64>> {
    let spec = MechanismSpec::laplace(epsilon, sensitivity)?;
    check_not_empty(values)?;
    let laplace = Laplace::new(0., calibrated_scale(&spec)?)?;
    Ok(add_noise(rng, values, &laplace))
}

fn add_noise<R: Rng + ?Sized, D: Distribution<f64>>(rng: &mut R, values: &[f64], noise: &D) -> Vec<f64> {
    values.iter().map(|v| v + noise.sample(rng)).collect()
}

/// Index of the largest score, the lowest index wins on exact ties
pub fn argmax(scores: &[f64]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    Some(
        scores
            .iter()
            .enumerate()
            .fold(0, |best, (i, s)| if *s > scores[best] { i } else { best }),
    )
}

/// Noise each score with Laplace(0, sensitivity/epsilon) and report the index of the maximum
pub fn report_noisy_max<R: Rng + ?Sized>(
    rng: &mut R,
    scores: &[f64],
    epsilon: f64,
    sensitivity: f64,
) -> Result<usize> {
    check_finite(scores)?;
    let noisy_scores = laplace(rng, scores, epsilon, sensitivity)?;
    argmax(&noisy_scores).ok_or(Error::EmptyInput)
}

/// The distribution p_i ∝ exp(epsilon * u_i / (2 * sensitivity))
///
/// The maximum utility is subtracted before exponentiating so that large
/// `epsilon * u_i` products cannot overflow. The factor `epsilon / (2 * sensitivity)`
/// itself must be finite and positive.
pub fn exponential_probabilities(
    utility: &[f64],
    epsilon: f64,
    sensitivity: f64,
) -> Result<Vec<f64>> {
    let epsilon = check_epsilon(epsilon)?;
    let sensitivity = check_sensitivity(sensitivity)?;
    check_not_empty(utility)?;
    check_finite(utility)?;
    let factor = check_scale(exponential_factor(epsilon, sensitivity))?;
    let max_utility = utility.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = utility
        .iter()
        .map(|u| (factor * (u - max_utility)).exp())
        .collect();
    // The maximum contributes exp(0) = 1 so the sum is at least 1
    let total: f64 = weights.iter().sum();
    Ok(weights.into_iter().map(|w| w / total).collect())
}

/// Sample an index according to the exponential mechanism
pub fn exponential_index<R: Rng + ?Sized>(
    rng: &mut R,
    utility: &[f64],
    epsilon: f64,
    sensitivity: f64,
) -> Result<usize> {
    let probabilities = exponential_probabilities(utility, epsilon, sensitivity)?;
    Ok(WeightedIndex::new(&probabilities)?.sample(rng))
}

/// Select an item of `domain` with the exponential mechanism, `utility` is parallel to `domain`
pub fn exponential<'a, T, R: Rng + ?Sized>(
    rng: &mut R,
    domain: &'a [T],
    utility: &[f64],
    epsilon: f64,
    sensitivity: f64,
) -> Result<&'a T> {
    check_not_empty(domain)?;
    if domain.len() != utility.len() {
        return Err(Error::length_mismatch(domain.len(), utility.len()));
    }
    let index = exponential_index(rng, utility, epsilon, sensitivity)?;
    Ok(&domain[index])
}

#[derive(Clone, Debug)]
enum Calibration<'a> {
    Gaussian { values: &'a [f64], noise: Normal },
    Laplace { values: &'a [f64], noise: Laplace },
    ReportNoisyMax { scores: &'a [f64], noise: Laplace },
    Exponential { weights: WeightedIndex<f64> },
}

/// A mechanism whose distribution is built and checked, so that sampling cannot fail
///
/// Building one draws no randomness: a caller can calibrate, then charge the budget,
/// then sample.
#[derive(Clone, Debug)]
pub struct CalibratedMechanism<'a> {
    spec: MechanismSpec,
    calibration: Calibration<'a>,
}

impl<'a> CalibratedMechanism<'a> {
    /// Calibrate `spec` on `inputs`: the values to noise for Gaussian and Laplace,
    /// the candidate scores for the selection mechanisms
    pub fn new(spec: &MechanismSpec, inputs: &'a [f64]) -> Result<Self> {
        let scale = calibrated_scale(spec)?;
        check_not_empty(inputs)?;
        if spec.kind().is_selection() {
            check_finite(inputs)?;
        }
        let calibration = match spec.kind() {
            MechanismKind::Gaussian => {
                if spec.epsilon() > 1. {
                    // Cf. Theorem A.1. in (Dwork, Roth et al. 2014)
                    log::warn!("Warning, epsilon>1 the gaussian mechanism applied will not be exactly epsilon,delta-DP!")
                }
                Calibration::Gaussian {
                    values: inputs,
                    noise: Normal::new(0., scale)?,
                }
            }
            MechanismKind::Laplace => Calibration::Laplace {
                values: inputs,
                noise: Laplace::new(0., scale)?,
            },
            MechanismKind::ReportNoisyMax => Calibration::ReportNoisyMax {
                scores: inputs,
                noise: Laplace::new(0., scale)?,
            },
            MechanismKind::Exponential => {
                let probabilities =
                    exponential_probabilities(inputs, spec.epsilon(), spec.sensitivity())?;
                Calibration::Exponential {
                    weights: WeightedIndex::new(&probabilities)?,
                }
            }
        };
        Ok(CalibratedMechanism {
            spec: *spec,
            calibration,
        })
    }

    pub fn spec(&self) -> &MechanismSpec {
        &self.spec
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> NoisedOutput {
        match &self.calibration {
            Calibration::Gaussian { values, noise } => NoisedOutput::Noised(add_noise(rng, values, noise)),
            Calibration::Laplace { values, noise } => NoisedOutput::Noised(add_noise(rng, values, noise)),
            Calibration::ReportNoisyMax { scores, noise } => {
                // scores are not empty
                NoisedOutput::Selected(argmax(&add_noise(rng, scores, noise)).unwrap_or_default())
            }
            Calibration::Exponential { weights } => NoisedOutput::Selected(weights.sample(rng)),
        }
    }
}

/// Run the mechanism described by `spec`
///
/// For Gaussian and Laplace every value is noised. For ReportNoisyMax the
/// candidate scores are `utility` if given, `values` otherwise. Exponential
/// requires `utility`, parallel to `values`.
pub fn run_mechanism<R: Rng + ?Sized>(
    rng: &mut R,
    spec: &MechanismSpec,
    values: &[f64],
    utility: Option<&[f64]>,
) -> Result<NoisedOutput> {
    let inputs = match (spec.kind(), utility) {
        (MechanismKind::Gaussian | MechanismKind::Laplace, _) => values,
        (MechanismKind::ReportNoisyMax, Some(utility))
            if !values.is_empty() && utility.len() != values.len() =>
        {
            return Err(Error::length_mismatch(values.len(), utility.len()))
        }
        (MechanismKind::ReportNoisyMax, Some(utility)) => utility,
        (MechanismKind::ReportNoisyMax, None) => values,
        (MechanismKind::Exponential, None) => return Err(Error::MissingUtility),
        (MechanismKind::Exponential, Some(utility)) => {
            check_not_empty(values)?;
            if values.len() != utility.len() {
                return Err(Error::length_mismatch(values.len(), utility.len()));
            }
            utility
        }
    };
    Ok(CalibratedMechanism::new(spec, inputs)?.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use statrs::{
        distribution::ContinuousCDF,
        statistics::{Data, Distribution as _},
    };

    const TRIALS: usize = 10_000;

    /// Kolmogorov-Smirnov statistic of a sample against a theoretical CDF
    fn ks_statistic(mut samples: Vec<f64>, cdf: impl Fn(f64) -> f64) -> f64 {
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = samples.len() as f64;
        samples
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let f = cdf(*x);
                ((i as f64 + 1.) / n - f).max(f - i as f64 / n)
            })
            .fold(0., f64::max)
    }

    #[test]
    fn test_gaussian_sigma() {
        let sigma = gaussian_sigma(1., 1e-5, 1.);
        println!("sigma = {sigma}");
        assert!((sigma - (2. * 125_000_f64.ln()).sqrt()).abs() < 1e-12);
        assert_eq!(gaussian_sigma(2., 1e-5, 1.), sigma / 2.);
        assert_eq!(gaussian_sigma(1., 1e-5, 3.), sigma * 3.);
    }

    #[test]
    fn test_laplace_mean_and_variance() {
        let mut rng = StdRng::seed_from_u64(1234);
        let (epsilon, sensitivity) = (0.5, 2.);
        let samples: Vec<f64> = (0..TRIALS)
            .map(|_| laplace(&mut rng, &[42.], epsilon, sensitivity).unwrap()[0])
            .collect();
        let data = Data::new(samples);
        let scale = laplace_scale(epsilon, sensitivity);
        let (mean, variance) = (data.mean().unwrap(), data.variance().unwrap());
        println!("mean = {mean}, variance = {variance}");
        assert!((mean - 42.).abs() < 0.25);
        assert!((variance / (2. * scale * scale) - 1.).abs() < 0.1);
    }

    #[test]
    fn test_gaussian_mean_and_variance() {
        let mut rng = StdRng::seed_from_u64(4321);
        let (epsilon, delta, sensitivity) = (1., 1e-5, 1.);
        let samples: Vec<f64> = (0..TRIALS)
            .map(|_| gaussian(&mut rng, &[-7.], epsilon, delta, sensitivity).unwrap()[0])
            .collect();
        let data = Data::new(samples);
        let sigma = gaussian_sigma(epsilon, delta, sensitivity);
        let (mean, variance) = (data.mean().unwrap(), data.variance().unwrap());
        println!("mean = {mean}, variance = {variance}, sigma^2 = {}", sigma * sigma);
        assert!((mean + 7.).abs() < 0.25);
        assert!((variance / (sigma * sigma) - 1.).abs() < 0.1);
    }

    #[test]
    fn test_laplace_kolmogorov_smirnov() {
        let mut rng = StdRng::seed_from_u64(2024);
        let samples: Vec<f64> = (0..TRIALS)
            .map(|_| laplace(&mut rng, &[100.], 1., 1.).unwrap()[0])
            .collect();
        let theoretical = Laplace::new(100., 1.).unwrap();
        let d = ks_statistic(samples, |x| theoretical.cdf(x));
        // Asymptotic critical value at significance 0.01
        let critical = 1.628 / (TRIALS as f64).sqrt();
        println!("D = {d}, critical = {critical}");
        assert!(d < critical);
    }

    #[test]
    fn test_noise_is_independent_per_element() {
        let mut rng = StdRng::seed_from_u64(7);
        let noised = laplace(&mut rng, &[0., 0., 0.], 1., 1.).unwrap();
        println!("{noised:?}");
        assert_eq!(noised.len(), 3);
        assert!(noised[0] != noised[1] && noised[1] != noised[2]);
    }

    #[test]
    fn test_invalid_parameters() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            laplace(&mut rng, &[1.], 0., 1.),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            gaussian(&mut rng, &[1.], 1., 1e-5, 0.),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(laplace(&mut rng, &[], 1., 1.), Err(Error::EmptyInput));
        assert_eq!(
            gaussian(&mut rng, &[], 1., 1e-5, 1.),
            Err(Error::EmptyInput)
        );
        assert_eq!(
            report_noisy_max(&mut rng, &[], 1., 1.),
            Err(Error::EmptyInput)
        );
    }

    #[test]
    fn test_argmax_lowest_index_on_ties() {
        assert_eq!(argmax(&[1., 3., 3., 2.]), Some(1));
        assert_eq!(argmax(&[5., 5., 5.]), Some(0));
        assert_eq!(argmax(&[-1., -2.]), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_report_noisy_max_clear_winner() {
        let mut rng = StdRng::seed_from_u64(99);
        let scores = [10., 60., 5., 0.];
        let hits = (0..1000)
            .filter(|_| report_noisy_max(&mut rng, &scores, 10., 1.).unwrap() == 1)
            .count();
        println!("hits = {hits}");
        assert!(hits >= 900);
    }

    #[test]
    fn test_exponential_probabilities_sum_to_one() {
        for utility in [
            vec![0.],
            vec![1., 2., 3.],
            vec![-10., 0., 10., 1e3],
            vec![0.5, 0.5, 2.5, -3.],
        ] {
            let probabilities = exponential_probabilities(&utility, 1.3, 0.7).unwrap();
            println!("{utility:?} -> {probabilities:?}");
            assert!(probabilities.iter().all(|p| *p >= 0.));
            assert!((probabilities.iter().sum::<f64>() - 1.).abs() < 1e-9);
        }
    }

    #[test]
    fn test_exponential_probabilities_uniform() {
        let probabilities = exponential_probabilities(&[4., 4., 4., 4.], 2., 1.).unwrap();
        for p in probabilities {
            assert!((p - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exponential_probabilities_do_not_overflow() {
        let probabilities = exponential_probabilities(&[1e6, 1e6 - 1., 0.], 1e3, 1.).unwrap();
        println!("{probabilities:?}");
        assert!(probabilities.iter().all(|p| p.is_finite()));
        assert!((probabilities[0] - 1.).abs() < 1e-9);
        assert!((probabilities.iter().sum::<f64>() - 1.).abs() < 1e-9);
    }

    #[test]
    fn test_exponential_probabilities_unusable_factor() {
        // epsilon / (2 * sensitivity) overflows to infinity
        assert!(matches!(
            exponential_probabilities(&[1., 2., 3.], 1e308, 0.1),
            Err(Error::InvalidParameter(_))
        ));
        // and here it underflows to 0
        assert!(matches!(
            exponential_probabilities(&[1., 2., 3.], 1e-300, 1e300),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_exponential_probabilities_ratio() {
        let probabilities = exponential_probabilities(&[0., 1.], 2., 1.).unwrap();
        let expected = 1_f64.exp() / (1. + 1_f64.exp());
        assert!((probabilities[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_exponential_sampling_frequencies() {
        let mut rng = StdRng::seed_from_u64(11);
        let domain = ["low", "high"];
        let high = (0..TRIALS)
            .filter(|_| *exponential(&mut rng, &domain, &[0., 1.], 2., 1.).unwrap() == "high")
            .count() as f64
            / TRIALS as f64;
        let expected = 1_f64.exp() / (1. + 1_f64.exp());
        println!("high = {high}, expected = {expected}");
        assert!((high - expected).abs() < 0.03);
    }

    #[test]
    fn test_exponential_errors() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            exponential(&mut rng, &["a", "b"], &[1.], 1., 1.),
            Err(Error::length_mismatch(2, 1))
        );
        let empty: [&str; 0] = [];
        assert_eq!(
            exponential(&mut rng, &empty, &[], 1., 1.),
            Err(Error::EmptyInput)
        );
        assert!(matches!(
            exponential_probabilities(&[1., f64::NAN], 1., 1.),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_run_mechanism() {
        let mut rng = StdRng::seed_from_u64(5);
        let laplace = MechanismSpec::laplace(1., 1.).unwrap();
        match run_mechanism(&mut rng, &laplace, &[1., 2.], None).unwrap() {
            NoisedOutput::Noised(values) => assert_eq!(values.len(), 2),
            output => panic!("unexpected {output:?}"),
        }
        let rnm = MechanismSpec::report_noisy_max(10., 1.).unwrap();
        assert_eq!(
            run_mechanism(&mut rng, &rnm, &[0., 100., 0.], None).unwrap(),
            NoisedOutput::Selected(1)
        );
        assert_eq!(
            run_mechanism(&mut rng, &rnm, &[0., 1.], Some(&[1., 2., 3.][..])),
            Err(Error::length_mismatch(2, 3))
        );
        let exponential = MechanismSpec::exponential(1., 1.).unwrap();
        assert_eq!(
            run_mechanism(&mut rng, &exponential, &[1., 2.], None),
            Err(Error::MissingUtility)
        );
        assert_eq!(
            run_mechanism(&mut rng, &exponential, &[1., 2.], Some(&[1.][..])),
            Err(Error::length_mismatch(2, 1))
        );
        assert!(matches!(
            run_mechanism(&mut rng, &exponential, &[1., 2.], Some(&[0., 1e4][..])).unwrap(),
            NoisedOutput::Selected(1)
        ));
    }

    #[test]
    fn test_calibrated_mechanism() {
        let spec = MechanismSpec::laplace(1., 1.).unwrap();
        let calibrated = CalibratedMechanism::new(&spec, &[1., 2., 3.]).unwrap();
        assert_eq!(calibrated.spec(), &spec);
        let mut rng = StdRng::seed_from_u64(17);
        let mut same_rng = StdRng::seed_from_u64(17);
        assert_eq!(
            calibrated.sample(&mut rng),
            run_mechanism(&mut same_rng, &spec, &[1., 2., 3.], None).unwrap()
        );
        assert!(matches!(
            CalibratedMechanism::new(&spec, &[]),
            Err(Error::EmptyInput)
        ));
        let exponential = MechanismSpec::exponential(5., 1e-308).unwrap();
        assert!(matches!(
            CalibratedMechanism::new(&exponential, &[1., 2.]),
            Err(Error::InvalidParameter(_))
        ));
        let laplace = MechanismSpec::laplace(1e-10, 1e300).unwrap();
        assert!(matches!(
            CalibratedMechanism::new(&laplace, &[1.]),
            Err(Error::InvalidParameter(_))
        ));
        let rnm = MechanismSpec::report_noisy_max(1., 1.).unwrap();
        assert!(matches!(
            CalibratedMechanism::new(&rnm, &[1., f64::NAN]),
            Err(Error::InvalidParameter(_))
        ));
    }
}
