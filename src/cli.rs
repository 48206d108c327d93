//! Argument parsing and subcommand dispatch.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::environment::{EnvValue, Environment};
use crate::error::SandwormError;
use crate::{clean, linearize, plugin, scheduler};

#[derive(Parser)]
#[command(name = "sandworm", about = "A small general-purpose build orchestrator", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a target (or the main target) from the Wormfile in CWD
    Build(BuildArgs),
    /// Run registered clean targets in reverse order
    Clean(CleanArgs),
    /// Create a Wormfile template in the current directory
    Init,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Target name, or a KEY=VAL assignment if it matches that pattern
    target: Option<String>,

    /// KEY=VAL Environment variable assignments
    assignments: Vec<String>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short = 'f', long)]
    format: Option<String>,

    /// Run in parallel. Bare `-p` is unbounded; `-p N` caps concurrency at N
    #[arg(short = 'p', long, num_args = 0..=1, default_missing_value = "unbounded")]
    parallel: Option<String>,
}

#[derive(clap::Args)]
struct CleanArgs {
    assignments: Vec<String>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short = 'f', long)]
    format: Option<String>,
}

/// Parses `KEY=VAL` tokens into `(key, value)` pairs; `key` must match
/// `[A-Za-z_][A-Za-z0-9_]*`.
fn parse_assignment(token: &str) -> Option<(String, String)> {
    let (key, val) = token.split_once('=')?;
    let mut chars = key.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if first_ok && rest_ok {
        Some((key.to_string(), val.to_string()))
    } else {
        None
    }
}

/// Splits the raw positional tokens into an optional target name and the
/// list of `KEY=VAL` assignments, per the reinterpretation rule: if the
/// first positional itself looks like `KEY=VAL`, there is no explicit
/// target and it joins the assignment list.
fn split_target_and_assignments(target: Option<String>, rest: &[String]) -> Result<(Option<String>, Vec<(String, String)>)> {
    let mut tokens: Vec<String> = Vec::new();
    let mut resolved_target = None;

    if let Some(t) = target {
        if parse_assignment(&t).is_some() {
            tokens.push(t);
        } else {
            resolved_target = Some(t);
        }
    }
    tokens.extend(rest.iter().cloned());

    let mut assignments = Vec::with_capacity(tokens.len());
    for tok in &tokens {
        match parse_assignment(tok) {
            Some(pair) => assignments.push(pair),
            None => bail!(SandwormError::InvalidAssignment(tok.clone())),
        }
    }

    Ok((resolved_target, assignments))
}

fn load_environment(clean_mode: bool, target_hint: &str, assignments: Vec<(String, String)>) -> Result<Environment> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let env = Environment::new(&cwd);
    env.set("SANDWORM_TARGET", target_hint);
    env.set("SANDWORM_CLEAN", clean_mode);
    for (k, v) in assignments {
        env.set(k, EnvValue::Str(v));
    }

    let mut env_mut = env.clone();
    let ok = plugin::load(&mut env_mut, &cwd)?;
    if !ok {
        bail!("Wormfile's load_targets returned false");
    }

    Ok(env)
}

fn run_build(args: BuildArgs) -> Result<bool> {
    crate::logging::init(args.verbose, args.format.as_deref());
    let (target_name, assignments) = split_target_and_assignments(args.target, &args.assignments)?;

    let env = load_environment(false, target_name.as_deref().unwrap_or(""), assignments)?;

    let target = match &target_name {
        Some(name) => env.target(name).ok_or_else(|| SandwormError::NoSuchTarget(name.clone()))?,
        None => env.main_target().ok_or(SandwormError::NoMainTarget)?,
    };

    Ok(match args.parallel.as_deref() {
        None => linearize::root_build(&target),
        Some("unbounded") => scheduler::parallel_build(&target, None),
        Some(raw) => {
            let n: usize = raw
                .parse()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| SandwormError::InvalidWorkerCount(raw.to_string()))?;
            scheduler::parallel_build(&target, Some(n))
        }
    })
}

fn run_clean(args: CleanArgs) -> Result<bool> {
    crate::logging::init(args.verbose, args.format.as_deref());
    let (_, assignments) = split_target_and_assignments(None, &args.assignments)?;
    let env = load_environment(true, "", assignments)?;
    Ok(clean::run_clean(&env))
}

fn run_init() -> Result<bool> {
    let dir = Path::new("Wormfile");
    if dir.exists() {
        bail!(SandwormError::WormfileExists(PathBuf::from("Wormfile")));
    }
    std::fs::create_dir_all(dir.join("src")).context("failed to create Wormfile/src")?;

    std::fs::write(
        dir.join("Cargo.toml"),
        "[package]\nname = \"wormfile\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n\
         [lib]\ncrate-type = [\"cdylib\"]\n\n[dependencies]\nsandworm = { path = \"..\" }\n",
    )
    .context("failed to write Wormfile/Cargo.toml")?;

    std::fs::write(
        dir.join("src/lib.rs"),
        "#[no_mangle]\npub extern \"C\" fn sandworm_load_targets(_env: &mut sandworm::Environment) -> bool {\n    false\n}\n",
    )
    .context("failed to write Wormfile/src/lib.rs")?;

    Ok(true)
}

/// Parses `argv` and runs the selected subcommand, returning the process
/// exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Build(args) => run_build(args),
        Commands::Clean(args) => run_clean(args),
        Commands::Init => run_init(),
    };

    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}
