use color_eyre::eyre::Result;
use gradwalk::data::Dataset;
use gradwalk::nn::{Module, TwoLayerNetwork};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(1337);
    let dataset = Dataset::synthetic(&mut rng, 120, &[1.0, -1.5])?;
    let (train, test) = dataset.split(0.75)?;

    let net = TwoLayerNetwork::new(&mut rng, train.features(), 8);
    println!("{net}");

    for epoch in 0..100 {
        net.zero_grad();
        let loss = net.loss(&train)?;
        loss.backward()?;
        net.sgd_step(0.5)?;

        if epoch % 10 == 0 {
            info!("epoch {epoch}: loss {:?}", loss.item());
            println!(
                "epoch {:3}: loss {:.6}, train accuracy {:.3}",
                epoch,
                loss.item().unwrap_or(f64::NAN),
                net.evaluate(&train)?
            );
        }
    }
    println!("test accuracy: {:.3}", net.evaluate(&test)?);

    Ok(())
}
