use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_DRAWS_PER_SAMPLE: usize = 10_000;

/// Writes a linearly separable two-class CSV: label in column 0, features after.
#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short, long, default_value_t = 200)]
    samples: usize,
    #[arg(short, long, default_value_t = 2)]
    features: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Points closer than this to the separating hyperplane are redrawn
    #[arg(long, default_value_t = 0.2)]
    margin: f32,
}

/// Points lie in [-2, 2]^n, so no distance to the hyperplane exceeds
/// 2 * sqrt(n).
fn check_margin(features: usize, margin: f32) -> anyhow::Result<()> {
    let reach = 2.0 * (features as f32).sqrt();
    anyhow::ensure!(
        (0.0..reach).contains(&margin),
        "margin must be in [0, {:.3}) for {} features, got {}",
        reach,
        features,
        margin
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    anyhow::ensure!(cli.features > 0, "need at least one feature column");
    check_margin(cli.features, cli.margin)?;

    if let Some(parent) = cli.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut rng = StdRng::seed_from_u64(cli.seed);
    // The class is the sign of the projection onto a random normal.
    let normal: Vec<f32> = (0..cli.features).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let norm = normal.iter().map(|w| w * w).sum::<f32>().sqrt().max(f32::EPSILON);

    let mut writer = BufWriter::new(File::create(&cli.output)?);
    let mut counts = [0usize; 2];
    let mut written = 0;
    let max_draws = cli.samples.saturating_mul(MAX_DRAWS_PER_SAMPLE).max(MAX_DRAWS_PER_SAMPLE);
    let mut draws = 0;
    while written < cli.samples {
        draws += 1;
        anyhow::ensure!(
            draws <= max_draws,
            "only {} of {} samples cleared margin {} after {} draws",
            written,
            cli.samples,
            cli.margin,
            max_draws
        );
        let point: Vec<f32> = (0..cli.features).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let distance = point.iter().zip(&normal).map(|(x, w)| x * w).sum::<f32>() / norm;
        if distance.abs() < cli.margin {
            continue;
        }
        let label = usize::from(distance > 0.0);
        counts[label] += 1;

        let row: Vec<String> = point.iter().map(|v| format!("{:.5}", v)).collect();
        writeln!(writer, "{},{}", label, row.join(","))?;
        written += 1;
    }
    writer.flush()?;

    println!(
        "Wrote {} samples ({} class 0, {} class 1) to {:?}",
        written, counts[0], counts[1], cli.output
    );
    Ok(())
}
