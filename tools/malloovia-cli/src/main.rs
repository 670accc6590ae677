use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Instant;

use clap::{Parser, Subcommand};
use colored::Colorize;

use malloovia::error::MallooviaError;
use malloovia::phases::{OmniscientPredictor, PhaseI, PhaseII, SolveOptions};
use malloovia::solution::Solution;
use malloovia::solver::SolverConfig;
use malloovia::yamlio;

#[derive(Parser, Debug)]
#[clap(name = "malloovia", version, about = "Malloovia command line interface")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validates problem/solution yaml files
    Validate {
        /// Files to validate
        #[clap(required = true)]
        filenames: Vec<PathBuf>,

        /// Show the full error message on failure
        #[clap(short, long)]
        verbose: bool,
    },

    /// Solves phase I and optionally phase II of given problems
    Solve {
        /// File containing the problems description
        problems_file: PathBuf,

        /// Id of the problem to be solved by the Phase I solver
        #[clap(long = "phase-i-id", short = '1')]
        phase_i_id: String,

        /// Id of the problem to be solved by the Phase II solver, using the
        /// reserved allocation found by Phase I
        #[clap(long = "phase-ii-id", short = '2')]
        phase_ii_id: Option<String>,

        /// Stop the engine at this relative optimality gap
        #[clap(long)]
        frac_gap: Option<f64>,

        /// Time limit per solve, in seconds
        #[clap(long)]
        max_seconds: Option<f64>,

        /// Threads the engine may use
        #[clap(long, default_value = "1")]
        threads: u32,

        /// Disable the GCD rescaling technique
        #[clap(long)]
        no_gcd: bool,

        /// Name of the output (solutions) file. Defaults to the problems
        /// file name with a -sol suffix.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Validate { filenames, verbose } => validate(&filenames, verbose),
        Command::Solve {
            problems_file,
            phase_i_id,
            phase_ii_id,
            frac_gap,
            max_seconds,
            threads,
            no_gcd,
            output,
        } => {
            let config = SolverConfig {
                frac_gap,
                max_seconds,
                threads,
                seed: None,
            };
            match solve(
                &problems_file,
                &phase_i_id,
                phase_ii_id.as_deref(),
                config,
                !no_gcd,
                output,
            ) {
                Ok(()) => 0,
                Err(error) => {
                    eprintln!("{}", error.to_string().red());
                    1
                }
            }
        }
    };
    exit(code);
}

fn validate(filenames: &[PathBuf], verbose: bool) -> i32 {
    let mut code = 0;
    for filename in filenames {
        match yamlio::validate_problems_file(filename) {
            Ok(problems) => println!(
                "{}",
                format!("{} is correct ({} problems)", filename.display(), problems).green()
            ),
            Err(error) => {
                code = 1;
                if verbose {
                    println!(
                        "{}",
                        format!("{} does not validate: {}", filename.display(), error).red()
                    );
                } else {
                    println!("{}", format!("{} does not validate", filename.display()).red());
                }
            }
        }
    }
    code
}

fn solve(
    problems_file: &Path,
    phase_i_id: &str,
    phase_ii_id: Option<&str>,
    config: SolverConfig,
    gcd: bool,
    output: Option<PathBuf>,
) -> Result<(), MallooviaError> {
    print!("Reading {}...", problems_file.display());
    let start = Instant::now();
    let problems = yamlio::read_problems_from_yaml(problems_file)?;
    println!("({:.3}s)", start.elapsed().as_secs_f64());

    let problem_i = problems.get(phase_i_id).ok_or_else(|| {
        MallooviaError::UnknownReference(format!("problem id '{}' not found", phase_i_id))
    })?;

    print!("Solving phase I...");
    let start = Instant::now();
    let options = SolveOptions {
        gcd,
        solver: config.clone(),
    };
    let solution_i = PhaseI::new(problem_i)?.solve(&options);
    println!("({:.3}s)", start.elapsed().as_secs_f64());
    let status = solution_i.solving_stats.algorithm.status;
    match solution_i.solving_stats.optimal_cost {
        Some(cost) => println!("  status: {}, cost: {}", status, cost),
        None => println!("  status: {}", status.to_string().yellow()),
    }

    let mut used_problems = vec![problem_i.clone()];
    let mut solutions = vec![Solution::PhaseI(solution_i.clone())];

    if let Some(phase_ii_id) = phase_ii_id {
        let problem_ii = problems.get(phase_ii_id).ok_or_else(|| {
            MallooviaError::UnknownReference(format!("problem id '{}' not found", phase_ii_id))
        })?;

        print!("Solving phase II...");
        let start = Instant::now();
        let predictor = OmniscientPredictor::new(&problem_ii.workloads)?;
        let mut phase_ii = PhaseII::new(problem_ii, &solution_i)?.with_solver(config);
        let solution_ii = phase_ii.solve_period(predictor)?;
        println!("({:.3}s)", start.elapsed().as_secs_f64());
        let global = &solution_ii.global_solving_stats;
        match global.optimal_cost {
            Some(cost) => println!("  status: {}, cost: {}", global.status, cost),
            None => println!("  status: {}", global.status.to_string().yellow()),
        }

        if phase_ii_id != phase_i_id {
            used_problems.push(problem_ii.clone());
        }
        solutions.push(Solution::PhaseII(solution_ii));
    }

    let output = output.unwrap_or_else(|| default_output(problems_file));
    print!("Writing solutions in {}...", output.display());
    let start = Instant::now();
    let yaml = yamlio::solutions_to_yaml(&used_problems, &solutions)?;
    yamlio::write_yaml_file(&output, &yaml)?;
    println!("({:.3}s)", start.elapsed().as_secs_f64());
    Ok(())
}

/// problems.yaml -> problems-sol.yaml (a .gz suffix is dropped first).
fn default_output(problems_file: &Path) -> PathBuf {
    let mut base = problems_file.to_path_buf();
    if base.extension().map_or(false, |ext| ext == "gz") {
        base.set_extension("");
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = base
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    base.with_file_name(format!("{}-sol{}", stem, extension))
}
