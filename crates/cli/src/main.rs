use std::time::Duration;
use std::{fs, process};

use clap::Parser;
use polycheck_cli::{cycle_dot, App, Command, GenerateArgs, VerifyArgs};
use polycheck_core::verdict::{CheckOptions, Outcome};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app = App::parse();
    match &app.command {
        Command::Generate(args) => generate(args),
        Command::Verify(args) => verify(args),
    }
}

fn generate(args: &GenerateArgs) {
    fs::create_dir_all(&args.output_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output directory: {e}");
        process::exit(1);
    });

    let histories = polycheck_testgen::generate_mult_histories(
        args.n_hist,
        args.n_node,
        args.n_var,
        args.n_txn,
        args.n_evt,
    );

    for history in &histories {
        let path = args.output_dir.join(format!("{}.json", history.get_id()));
        let file = fs::File::create(&path).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {e}", path.display());
            process::exit(1);
        });
        serde_json::to_writer_pretty(file, history).unwrap_or_else(|e| {
            eprintln!("Failed to write {}: {e}", path.display());
            process::exit(1);
        });
    }

    println!(
        "Generated {} histories to {}",
        histories.len(),
        args.output_dir.display()
    );
}

fn verify(args: &VerifyArgs) {
    let options = CheckOptions {
        isolation: args.isolation.into(),
        pruning: !args.no_pruning,
        budget_conflicts: args.budget_conflicts,
        budget_wall: args.budget_wall_ms.map(Duration::from_millis),
        ..CheckOptions::new()
    };

    let mut entries: Vec<_> = fs::read_dir(&args.input_dir)
        .unwrap_or_else(|e| {
            eprintln!("Failed to read input directory: {e}");
            process::exit(1);
        })
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .collect();

    entries.sort_by_key(fs::DirEntry::path);

    if entries.is_empty() {
        eprintln!("No .json files found in {}", args.input_dir.display());
        process::exit(1);
    }

    let mut any_failed = false;
    let mut dot_written = false;

    for entry in entries {
        let path = entry.path();
        let filename = path.file_name().unwrap_or_default().to_string_lossy();

        let file = fs::File::open(&path).unwrap_or_else(|e| {
            eprintln!("Failed to open {filename}: {e}");
            process::exit(1);
        });

        let history: polycheck_testgen::History =
            serde_json::from_reader(file).unwrap_or_else(|e| {
                eprintln!("Failed to parse {filename}: {e}");
                process::exit(1);
            });

        match polycheck_smt::check(history.get_data(), &options) {
            Ok(Outcome::Accept) => println!("{filename}: PASS"),
            Ok(Outcome::Reject(cycle)) => {
                println!("{filename}: FAIL ({cycle})");
                any_failed = true;
                if let Some(dot_path) = args.emit_cycle_dot.as_ref().filter(|_| !dot_written) {
                    let dot = cycle_dot(history.get_data(), &cycle);
                    fs::write(dot_path, dot).unwrap_or_else(|e| {
                        eprintln!("Failed to write {}: {e}", dot_path.display());
                        process::exit(1);
                    });
                    dot_written = true;
                }
            }
            Err(e) => {
                eprintln!("{filename}: ERROR ({e})");
                process::exit(2);
            }
        }
    }

    if any_failed {
        process::exit(1);
    }
}
