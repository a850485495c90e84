use color_eyre::eyre::Result;
use gradwalk::engine::viz;
use gradwalk::Value;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let a = Value::tracked(-4.0);
    let b = Value::tracked(2.0);
    let mut c = &a + &b;
    let mut d = &a * &b + b.pow(3.);
    c = &c + (&c + 1.);
    c = &c + (1. + &c + (-&a));
    d = &d + (&d * 2. + (&b + &a).relu());
    d = &d + (3. * &d + (&b - &a).relu());
    let e = &c - &d;
    let f = e.pow(2.);
    let mut g = &f / 2.0;
    g = g + (10.0 / &f);
    g.backward()?;

    let dot = viz::render_dot(&g);
    println!("{dot}");

    Ok(())
}
