//! uop-emu: reference interpreter for tensor-kernel micro-operation programs

use anyhow::{bail, Context};
use std::env;
use std::path::{Path, PathBuf};
use uop_emu::config::Config;
use uop_emu::testing::{ManifestResult, ManifestRunner};

const USAGE: &str = "\
Usage: uop-emu <command> [options]

Commands:
  run <manifest.toml>... [--time]   Run kernel manifests and check their outputs
  suite [dir] [--time]              Run every *.toml manifest in a directory
  config                            Show configuration sources and a sample file

Options:
  --time      Report wall-clock time per launch
  -h, --help  Show this help

Environment:
  TRACE=1, UOP_EMU_TRACE=1          Log every executed instruction
  EMULATE_METAL=1, EMULATE_HIP=1    Emulate a tensor-core target
  UOP_EMU_MANIFEST_DIR              Default directory for `suite`";

fn main() -> anyhow::Result<()> {
    let config = Config::get();
    init_logging(config);

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let time = args.iter().any(|a| a == "--time");
    let positional: Vec<&str> = args[1..]
        .iter()
        .filter(|a| !a.starts_with('-'))
        .map(String::as_str)
        .collect();
    if let Some(unknown) = args[1..]
        .iter()
        .find(|a| a.starts_with('-') && a.as_str() != "--time")
    {
        bail!("unknown option '{}'\n\n{}", unknown, USAGE);
    }

    let runner = ManifestRunner::new().with_time(time);
    match args[0].as_str() {
        "run" => {
            if positional.is_empty() {
                bail!("run needs at least one manifest\n\n{}", USAGE);
            }
            let mut failed = 0;
            for path in &positional {
                let result = runner.run_file(Path::new(path))?;
                print_result(&result);
                if !result.passed {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} of {} kernels failed", failed, positional.len());
            }
        }
        "suite" => {
            let dir = positional
                .first()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.manifest_dir());
            run_suite(&runner, &dir)?;
        }
        "config" => print_config(config),
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let default = if config.trace() { "trace" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn run_suite(runner: &ManifestRunner, dir: &Path) -> anyhow::Result<()> {
    let results = runner
        .run_dir(dir)
        .with_context(|| format!("suite in {}", dir.display()))?;
    if results.is_empty() {
        bail!("no manifests found in {}", dir.display());
    }

    println!("Running {} manifests from {}", results.len(), dir.display());
    println!();

    let mut passed = 0;
    for (path, result) in &results {
        match result {
            Ok(result) => {
                print_result(result);
                if result.passed {
                    passed += 1;
                }
            }
            Err(e) => println!("ERROR {}: {:#}", path.display(), e),
        }
    }

    println!();
    println!("{}/{} passed", passed, results.len());
    if passed != results.len() {
        bail!("{} manifests failed", results.len() - passed);
    }
    Ok(())
}

fn print_result(result: &ManifestResult) {
    let status = if result.passed { "PASS" } else { "FAIL" };
    print!(
        "{} {:<24} {}/{} correct, {} instructions",
        status, result.name, result.correct_count, result.total_count, result.instructions
    );
    if let Some(elapsed) = result.elapsed {
        print!(", {:.3} ms", elapsed.as_secs_f64() * 1e3);
    }
    println!();
    if let Some(mismatch) = &result.first_mismatch {
        println!("     first mismatch: {}", mismatch);
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    match Config::user_config_path() {
        Some(path) => println!("User config:  {}", path.display()),
        None => println!("User config:  (no config directory)"),
    }
    println!("Local config: ./uop-emu.toml");
    println!();

    let target = config.target();
    println!("trace:        {}", config.trace());
    println!("target:       {}", target.device());
    println!("tensor cores: {}", target.has_tensor_cores());
    if let Some(tag) = target.wmma_tag() {
        println!("wmma tag:     {}", tag);
    }
    println!("manifest dir: {}", config.manifest_dir().display());
    println!();
    println!("Sample config:");
    println!("--------------");
    print!("{}", Config::sample_config());
}
