use std::{fs::File, io::BufReader, time::Duration, time::Instant};

use clap::Parser;
use console::style;
use csv::WriterBuilder;
use itertools::Itertools;
use modsolve::{
    snapshot::UniverseSnapshot, Budget, Interner, NameId, Request, SolveError, Solver,
    SolverConfig,
};
use rand::{prelude::IteratorRandom, rngs::StdRng, Rng, SeedableRng};

#[derive(Parser)]
#[clap(version = "0.1.0")]
struct Opts {
    snapshot: String,

    /// The maximum number of requests to solve
    #[clap(long, short = 'n', default_value = "1000")]
    limit: usize,

    /// The timeout to use for solving a request in seconds. If a solve takes
    /// longer it is aborted.
    #[clap(long, default_value = "60")]
    timeout: u64,

    /// The maximum number of search steps per request.
    #[clap(long)]
    max_steps: Option<u64>,

    /// Solve every requested package in its own namespace.
    #[clap(long)]
    independent_goals: bool,

    /// The random seed to use for generating the requests.
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Where the timings are written to.
    #[clap(long, default_value = "timings.csv")]
    output: String,
}

#[derive(Debug, serde::Serialize)]
struct Record {
    packages: String,
    duration: f64,
    steps: Option<u64>,
    backjumps: Option<u64>,
    error: Option<String>,
    records: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts: Opts = Opts::parse();

    eprintln!("Loading snapshot ...");
    let snapshot_file = BufReader::new(File::open(&opts.snapshot)?);
    let snapshot: UniverseSnapshot = serde_json::from_reader(snapshot_file)?;
    let names: Vec<NameId> = snapshot.packages.iter().map(|(name, _)| name).collect();
    if names.is_empty() {
        return Err("the snapshot does not contain any package".into());
    }

    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(&opts.output)?;

    let config = SolverConfig::default()
        .with_independent_goals(opts.independent_goals)
        .with_budget(Budget {
            max_steps: opts.max_steps,
            max_backjumps: None,
            timeout: Some(Duration::from_secs(opts.timeout)),
        });
    let solver = Solver::new(snapshot);

    let mut rng = StdRng::seed_from_u64(opts.seed);
    for i in 0..opts.limit {
        // Construct a request with a random number of goals.
        let num_goals = rng.random_range(1..=10usize);
        let goals = names.iter().copied().choose_multiple(&mut rng, num_goals);

        let request_name = goals
            .iter()
            .format_with("\n", |&name, f| {
                f(&format_args!("{}", solver.provider().display_name(name)))
            })
            .to_string();
        eprintln!(
            "solving ({}/{})...\n{}",
            i + 1,
            opts.limit,
            goals.iter().format_with("\n", |&name, f| {
                f(&format_args!(
                    "- {}",
                    style(solver.provider().display_name(name)).dim()
                ))
            })
        );

        let request = Request::new().goals(goals);
        let start = Instant::now();
        let result = solver.solve(&request, &config);
        let duration = start.elapsed();

        let mut record = Record {
            packages: request_name,
            duration: duration.as_secs_f64(),
            steps: None,
            backjumps: None,
            error: None,
            records: None,
        };
        match result {
            Ok(plan) => {
                eprintln!(
                    "{}",
                    style(format!(
                        "==> OK in {:.2}ms, {} packages, {} steps",
                        duration.as_secs_f64() * 1000.0,
                        plan.len(),
                        plan.stats().steps,
                    ))
                    .green()
                );
                record.records = Some(plan.len());
                record.steps = Some(plan.stats().steps);
                record.backjumps = Some(plan.stats().backjumps);
            }
            Err(SolveError::Unsolvable(conflict)) => {
                eprintln!(
                    "{}",
                    style(format!(
                        "==> FAIL in {:.2}ms",
                        duration.as_secs_f64() * 1000.0
                    ))
                    .yellow()
                );
                record.steps = Some(conflict.stats().steps);
                record.backjumps = Some(conflict.stats().backjumps);
                record.error = Some(
                    conflict
                        .display_user_friendly(solver.provider())
                        .to_string(),
                );
            }
            Err(SolveError::BudgetExceeded(exhausted)) => {
                eprintln!(
                    "{}",
                    style(format!(
                        "==> ABORTED after {:.2}ms: {}",
                        duration.as_secs_f64() * 1000.0,
                        exhausted.limit
                    ))
                    .red()
                );
                record.steps = Some(exhausted.steps);
                record.backjumps = Some(exhausted.backjumps);
                record.error = Some(exhausted.limit.to_string());
            }
            Err(error) => {
                eprintln!("{}", style(format!("==> ERROR: {error}")).red());
                record.error = Some(error.to_string());
            }
        }

        writer.serialize(record)?;
        if i % 10 == 0 {
            writer.flush()?;
        }
    }

    writer.flush()?;
    Ok(())
}
