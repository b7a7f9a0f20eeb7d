//! CLI demo for the tensor computation graph.
//!
//! Builds a few expressions, prints values and gradients, and validates
//! them against finite differences. Set `RUST_LOG=tg_core=trace` to watch
//! the graph being built and differentiated.

use std::process::ExitCode;

use tg_core::prelude::*;
use tg_core::{finite_diff_grad, max_grad_error};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn f64_graph() -> Graph {
    Graph::with_options(GraphOptions {
        default_dtype: DType::F64,
        ..Default::default()
    })
}

fn vec64(data: &[f64]) -> Result<NdArray> {
    NdArray::with_dtype([data.len()], data.to_vec(), DType::F64)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    println!("=== Tensor Graph Autodiff Demo ===\n");

    // z = x * y + x
    let graph = Graph::new();
    let recording = graph.track_computation();
    let x = graph.placeholder("x", NdArray::scalar(2.0));
    let y = graph.placeholder("y", NdArray::scalar(3.0));
    let z = (x * y + x)?;
    drop(recording);

    println!("Expression: z = {}", z.to_plain());
    println!("LaTeX:      {}", z.to_latex());
    println!("At point:   x = {}, y = {}", x, y);
    println!("Value:      z = {}\n", z);

    z.backward(None)?;
    println!("Reverse mode:");
    println!("  dz/dx = {}", x.gradient().unwrap_or_else(|| NdArray::scalar(0.0)));
    println!("  dz/dy = {}", y.gradient().unwrap_or_else(|| NdArray::scalar(0.0)));
    println!("Forward mode:");
    println!("  dz/dx = {}", z.forward("x")?);
    println!("  dz/dy = {}\n", z.forward("y")?);

    let env = Env::from([
        ("x".to_string(), NdArray::scalar(-1.0)),
        ("y".to_string(), NdArray::scalar(4.0)),
    ]);
    println!("Re-evaluated at x = -1, y = 4: z = {}\n", z.eval(&env)?);

    // e = sum(w * sin(a) * exp(b) / (b + 2)) over vectors
    println!("=== Gradient Check ===\n");
    let a0 = vec64(&[0.5, 1.0, 1.5])?;
    let b0 = vec64(&[2.0, 2.5, 3.0])?;
    let w = vec64(&[1.0, -0.5, 0.25])?;

    fn expression<'g>(a: Tensor<'g>, b: Tensor<'g>, w: Tensor<'g>) -> Result<Tensor<'g>> {
        let num = (a.sin()? * b.exp()?)?;
        let den = (b + 2.0)?;
        (num / den)? * w
    }

    let graph = f64_graph();
    let _recording = graph.track_computation();
    let a = graph.placeholder("a", a0.clone());
    let b = graph.placeholder("b", b0.clone());
    let weights = graph.constant(w.clone());
    let e = expression(a, b, weights)?;
    println!("Expression: e = {}", e.to_plain());
    println!("Value:      e = {}\n", e);

    e.backward(Some(&NdArray::ones(e.shape(), DType::F64)))?;
    let grad_a = a.gradient().unwrap_or_else(|| NdArray::zeros(a.shape(), DType::F64));
    let grad_b = b.gradient().unwrap_or_else(|| NdArray::zeros(b.shape(), DType::F64));

    let fd_a = finite_diff_grad(
        |p: &NdArray| -> Result<f64> {
            let g = f64_graph();
            let out = expression(g.array(p.clone()), g.array(b0.clone()), g.constant(w.clone()))?;
            Ok(out.value().sum())
        },
        &a0,
        1e-6,
    )?;
    let fd_b = finite_diff_grad(
        |p: &NdArray| -> Result<f64> {
            let g = f64_graph();
            let out = expression(g.array(a0.clone()), g.array(p.clone()), g.constant(w.clone()))?;
            Ok(out.value().sum())
        },
        &b0,
        1e-6,
    )?;

    println!("Autodiff:          de/da = {}", grad_a);
    println!("Finite difference: de/da = {}", fd_a);
    println!("Autodiff:          de/db = {}", grad_b);
    println!("Finite difference: de/db = {}\n", fd_b);

    let max_err = max_grad_error(&grad_a, &fd_a)?.max(max_grad_error(&grad_b, &fd_b)?);
    let tolerance = 1e-6;
    info!(max_err, tolerance, "finite difference check");
    if max_err < tolerance {
        println!("PASS: Max error ({:.2e}) < tolerance ({:.2e})", max_err, tolerance);
    } else {
        println!("FAIL: Max error ({:.2e}) >= tolerance ({:.2e})", max_err, tolerance);
        return Ok(false);
    }

    // Diamond graph with the shared node consumed twice
    println!("\n=== Shared Subexpression ===\n");
    println!("z = s * y + s with s = x * x, at x = 2, y = 3");
    for policy in [GradientPolicy::Accumulate, GradientPolicy::Overwrite] {
        let graph = Graph::with_options(GraphOptions {
            gradient_policy: policy,
            ..Default::default()
        });
        let _recording = graph.track_computation();
        let x = graph.scalar(2.0);
        let y = graph.scalar(3.0);
        let s = (x * x)?;
        let z = (s * y + s)?;
        z.backward(None)?;
        println!(
            "  {:?}: ds = {}, dx = {} (expected 2x(y + 1) = 16)",
            policy,
            s.gradient().unwrap_or_else(|| NdArray::scalar(0.0)),
            x.gradient().unwrap_or_else(|| NdArray::scalar(0.0)),
        );
    }

    Ok(true)
}
