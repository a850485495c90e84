use color_eyre::eyre::Result;
use gradwalk::{Tensor, Value};

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let a = Value::tracked(3.0);
    a.pow(2.).backward()?;
    println!("d(a^2)/da at a = 3: {}", grad_text(&a));

    let x = Value::tracked(vec![3., 4.]);
    x.pow(2.).sum().backward()?;
    println!("d sum(x^2)/dx at x = [3, 4]: {}", grad_text(&x));

    let x = Value::tracked(vec![3., 4.]);
    x.pow(2.).mean().backward()?;
    println!("d mean(x^2)/dx at x = [3, 4]: {}", grad_text(&x));

    let x = Value::tracked(Tensor::from_rows(&[vec![1., 2.], vec![3., 4.]])?);
    let y = &x + 2.;
    let out = (3. * y.pow(2.)).sum();
    out.backward()?;
    println!("d sum(3(x+2)^2)/dx:\n{}", grad_text(&x));

    let x = Value::tracked(0.5);
    let frozen = x.detach();
    (x.sin() * &frozen).backward()?;
    println!(
        "d(sin(x)·detach(x))/dx at x = 0.5: {} (detached: {})",
        grad_text(&x),
        grad_text(&frozen)
    );

    Ok(())
}

fn grad_text(v: &Value) -> String {
    v.grad().map_or("None".to_string(), |g| g.to_string())
}
