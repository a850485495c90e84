use color_eyre::eyre::Result;
use gradwalk::data::{Dataset, TabularLoader};
use gradwalk::descent::{adagrad, DescentConfig};
use gradwalk::logistic::{LogisticEnvironment, LogisticRegressionModel};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Fits a logistic model with Adagrad. Reads a CSV file (label in the last
/// column) when a path is given, otherwise samples a separable dataset.
fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let dataset = match std::env::args().nth(1) {
        Some(path) => TabularLoader::default().with_intercept().from_path(path)?,
        None => {
            let mut rng = StdRng::seed_from_u64(42);
            Dataset::synthetic(&mut rng, 400, &[0.25, 2.0, -3.0])?
        }
    };
    let (train, test) = dataset.split(0.8)?;
    info!("{} training rows, {} test rows", train.len(), test.len());

    let config = DescentConfig::new(vec![0.; train.features()]).with_max_steps(2_000);
    let mut weights = config.initial.clone();
    let env = LogisticEnvironment::new(config, &train)?.with_l2(1e-3);

    let mut descent = adagrad(0.5, &env);
    for estimate in descent.by_ref() {
        weights = estimate?;
    }
    println!("stopped after {} steps", descent.steps());
    println!("weights: {weights}");
    println!("training loss: {:.6}", env.loss(&weights)?);

    let model = LogisticRegressionModel::new(weights);
    let accuracy = model.evaluate(test.evidence(), test.response())?;
    println!("test accuracy: {:.3}", accuracy);

    Ok(())
}
