//! Train a relational policy on a registered domain.
//!
//! Resumes from the generator checkpoint when one exists, runs the learner,
//! then writes the checkpoints and a JSON summary.

use std::path::PathBuf;
use std::time::Instant;

use relpolicy::config::LearnerConfig;
use relpolicy::env_config::{apply_env_overrides, init_rayon_threads};
use relpolicy::logging::init_logging;
use relpolicy::logic::DomainRegistry;
use relpolicy::simulation::Learner;
use relpolicy::storage::{
    load_generator_or_fresh, save_elites, save_generator, ELITES_FILE_PATH, GENERATOR_FILE_PATH,
};

fn usage() {
    println!("Usage: relpolicy-train [OPTIONS]");
    println!("  --domain NAME      Domain to train on (default: blocks)");
    println!("  --config PATH      JSON learner config (defaults for missing fields)");
    println!("  --generations N    Generation budget (overrides config)");
    println!("  --seed S           Random seed (overrides config)");
    println!("  --generator PATH   Generator checkpoint (default: {GENERATOR_FILE_PATH})");
    println!("  --elites PATH      Elite checkpoint (default: {ELITES_FILE_PATH})");
    println!("  --output PATH      Summary JSON (default: outputs/training_summary.json)");
    println!("  --fresh            Ignore an existing generator checkpoint");
    println!("  --debug            Debug logging (RUST_LOG takes precedence)");
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    args.get(i)
        .map(String::as_str)
        .unwrap_or_else(|| fail(format!("Missing value for {flag}")))
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mut domain_name = String::from("blocks");
    let mut config_path: Option<PathBuf> = None;
    let mut generations: Option<usize> = None;
    let mut seed: Option<u64> = None;
    let mut generator_path = PathBuf::from(GENERATOR_FILE_PATH);
    let mut elites_path = PathBuf::from(ELITES_FILE_PATH);
    let mut output_path = PathBuf::from("outputs/training_summary.json");
    let mut fresh = false;
    let mut debug = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--domain" => {
                i += 1;
                domain_name = value(&args, i, "--domain").to_string();
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(value(&args, i, "--config")));
            }
            "--generations" => {
                i += 1;
                generations = Some(
                    value(&args, i, "--generations")
                        .parse()
                        .unwrap_or_else(|_| fail("Invalid --generations")),
                );
            }
            "--seed" => {
                i += 1;
                seed = Some(
                    value(&args, i, "--seed")
                        .parse()
                        .unwrap_or_else(|_| fail("Invalid --seed")),
                );
            }
            "--generator" => {
                i += 1;
                generator_path = PathBuf::from(value(&args, i, "--generator"));
            }
            "--elites" => {
                i += 1;
                elites_path = PathBuf::from(value(&args, i, "--elites"));
            }
            "--output" => {
                i += 1;
                output_path = PathBuf::from(value(&args, i, "--output"));
            }
            "--fresh" => fresh = true,
            "--debug" => debug = true,
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    init_logging(debug);
    let num_threads = init_rayon_threads();

    let mut config = match &config_path {
        Some(path) => LearnerConfig::from_file(path).unwrap_or_else(|e| fail(e)),
        None => LearnerConfig::default(),
    };
    config = apply_env_overrides(config);
    if let Some(generations) = generations {
        config.generations = generations;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }

    let registry = DomainRegistry::with_builtin();
    let domain = registry.create(&domain_name).unwrap_or_else(|e| {
        let known: Vec<&str> = registry.names().collect();
        fail(format!("{e} (known: {})", known.join(", ")))
    });

    println!(
        "Training on '{}' for up to {} generations (seed={}, threads={})...",
        domain_name, config.generations, config.seed, num_threads
    );
    let total_start = Instant::now();

    let mut learner = Learner::new(domain, config);
    if !fresh {
        if let Some(checkpoint) = load_generator_or_fresh(&generator_path) {
            learner.restore(&checkpoint);
            println!(
                "  Resumed {} slots from {}",
                learner.distribution().len(),
                generator_path.display()
            );
        }
    }

    let summary = learner.train().unwrap_or_else(|e| fail(format!("Training failed: {e}")));

    if let Err(e) = save_generator(&generator_path, learner.distribution(), learner.arena()) {
        eprintln!("Failed to save generator: {e}");
    }
    if let Err(e) = save_elites(&elites_path, learner.updater().elites(), learner.arena()) {
        eprintln!("Failed to save elites: {e}");
    }

    if let Some(parent) = output_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&output_path, json) {
                eprintln!("Failed to write {}: {e}", output_path.display());
            }
        }
        Err(e) => eprintln!("Failed to serialise summary: {e}"),
    }

    println!();
    println!(
        "Generations: {}{}",
        summary.generations,
        if summary.converged { " (converged)" } else { "" }
    );
    println!("Best sampled value: {:.2}", summary.best_value);
    println!("Greedy value:       {:.2}", summary.greedy_value);
    println!("Rules: {} active / {} total", summary.active_rules, summary.total_rules);
    println!("Greedy policy:");
    for rule in &summary.greedy_policy {
        println!("  {rule}");
    }
    for slot in &summary.slots {
        println!("Slot {} (p={:.3}):", slot.action, slot.probability);
        for rule in slot.rules.iter().take(3) {
            println!("  {:.3}  {}", rule.probability, rule.rule);
        }
    }
    println!("Summary written to {}", output_path.display());
    println!("Total time: {:.2}s", total_start.elapsed().as_secs_f64());
}
