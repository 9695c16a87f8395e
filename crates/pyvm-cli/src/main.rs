//! Console front end: runs a script, an interactive session, or a quick
//! self-test against a freshly loaded VM.
//!
//! Usage:
//!   pyvm                      interactive console
//!   pyvm script.py            run a file
//!   pyvm --self-test --platform js

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use clap::Parser;
use pyvm::{ConsoleBridge, ErrorKind, Object, RunOptions, Vm, VmOptions, format_elapsed};
use pyvm_interp::{DEFAULT_SCRIPT_NAME, InterpConfig, Interpreter, ResourceLimits};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    time::Instant,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pyvm", version, about = "Run Python-subset code through the pyvm command interface")]
struct Args {
    /// Script to run; starts an interactive console when omitted
    file: Option<PathBuf>,

    /// Only report failed runs on the status line
    #[arg(long)]
    quiet: bool,

    /// Run the built-in checks against a fresh VM and exit
    #[arg(long, conflicts_with = "file")]
    self_test: bool,

    /// Value of `sys.platform` (defaults to the host OS)
    #[arg(long)]
    platform: Option<String>,

    /// Filename shown in tracebacks
    #[arg(long, default_value = DEFAULT_SCRIPT_NAME)]
    script_name: String,

    /// Statement budget for each exec
    #[arg(long)]
    max_operations: Option<usize>,

    /// File run once while the runtime boots
    #[arg(long)]
    prelude: Option<PathBuf>,

    /// Extra milliseconds the runtime takes to load
    #[arg(long, default_value_t = 0)]
    load_delay: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    tokio::task::LocalSet::new().block_on(&runtime, run(args, config))
}

fn build_config(args: &Args) -> Result<InterpConfig, String> {
    let mut limits = ResourceLimits::new();
    if let Some(max) = args.max_operations {
        limits = limits.max_operations(max);
    }
    let mut config = InterpConfig::default().script_name(&args.script_name).limits(limits);
    if let Some(platform) = &args.platform {
        config = config.platform(platform);
    }
    if let Some(path) = &args.prelude {
        config = config.prelude(read_file(path)?);
    }
    Ok(config)
}

async fn run(args: Args, config: InterpConfig) -> ExitCode {
    tracing::debug!(?config, load_delay = args.load_delay, "starting");
    let platform = config.platform.clone();
    let init_start = Instant::now();
    let delay = tokio::time::sleep(Duration::from_millis(args.load_delay));
    let vm = Vm::spawn_with(
        Interpreter::delayed_loader(config, delay),
        VmOptions::default()
            .label("console")
            .stdout(|text: &str| print!("{text}"))
            .stderr(|text: &str| eprint!("{text}")),
    );

    if args.self_test {
        return self_test(&vm, &platform).await;
    }

    let console = ConsoleBridge::new(vm, |status: &str| eprintln!("[{status}]"));
    let options = if args.quiet {
        RunOptions::quiet()
    } else {
        RunOptions::verbose()
    };
    match args.file {
        Some(path) => {
            let source = match read_file(&path) {
                Ok(source) => source,
                Err(err) => {
                    eprintln!("error: {err}");
                    return ExitCode::FAILURE;
                }
            };
            let outcome = console.run(&source, options).await;
            if outcome.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => interactive(&console, options, init_start).await,
    }
}

async fn interactive(console: &ConsoleBridge, options: RunOptions, init_start: Instant) -> ExitCode {
    let vm = console.vm();
    vm.output().stdout("Loading pyvm.\nThis might take a while...\n\n");
    if let Err(err) = vm.ready().await {
        eprintln!("ERROR: {err}");
        return ExitCode::FAILURE;
    }
    console.run("print('Welcome to pyvm!')", RunOptions::quiet()).await;
    eprintln!("[init in {}]", format_elapsed(init_start.elapsed()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(">>> ");
        let Some(source) = read_block(&mut lines).await else {
            break;
        };
        if source.trim().is_empty() {
            continue;
        }
        console.run(&source, options).await;
    }
    println!();
    ExitCode::SUCCESS
}

/// Reads one statement; a line ending in `:` opens a block that continues until
/// a blank line. `None` at end of input.
async fn read_block(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    let mut source = lines.next_line().await.ok().flatten()?;
    if !source.trim_end().ends_with(':') {
        return Some(source);
    }
    loop {
        prompt("... ");
        match lines.next_line().await.ok().flatten() {
            Some(line) if !line.trim().is_empty() => {
                source.push('\n');
                source.push_str(&line);
            }
            _ => return Some(source),
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    // a failed flush only delays the prompt
    let _ = std::io::stdout().flush();
}

async fn self_test(vm: &Vm, platform: &str) -> ExitCode {
    match checks(vm, platform).await {
        Ok(()) => {
            println!("TESTS PASSED!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("TESTS FAILED!");
            println!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn checks(vm: &Vm, platform: &str) -> Result<(), String> {
    vm.ready().await.map_err(|err| err.to_string())?;

    // program errors must surface as errors, not be swallowed
    match vm.exec("raise RuntimeError").await {
        Err(err) if err.kind() == ErrorKind::RuntimeError => {}
        Err(err) => return Err(format!("raise produced a {} instead: {err}", err.kind())),
        Ok(()) => return Err("Python exception did not produce an error".to_owned()),
    }

    vm.set("x", 7).await.map_err(|err| err.to_string())?;
    vm.exec("x = x * 2").await.map_err(|err| err.to_string())?;
    let x = vm.get("x").await.map_err(|err| err.to_string())?;
    if x != Object::Int(14) {
        return Err(format!("set-exec-get cycle failed: got {x}"));
    }

    vm.exec("assert __name__ == '__main__', __name__")
        .await
        .map_err(|err| err.to_string())?;
    let expected = Object::from(platform).py_repr();
    vm.exec(format!("import sys; assert sys.platform == {expected}, sys.platform"))
        .await
        .map_err(|err| err.to_string())?;
    Ok(())
}

fn read_file(path: &Path) -> Result<String, String> {
    match fs::metadata(path) {
        Ok(metadata) if !metadata.is_file() => return Err(format!("{} is not a file", path.display())),
        Ok(_) => {}
        Err(err) => return Err(format!("reading {}: {err}", path.display())),
    }
    fs::read_to_string(path).map_err(|err| format!("reading {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run_checks(platform: &str) -> Result<(), String> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        tokio::task::LocalSet::new().block_on(&runtime, async {
            let vm = Vm::spawn(Interpreter::loader(InterpConfig::default().platform(platform)));
            checks(&vm, platform).await
        })
    }

    #[test]
    fn self_test_passes_for_plain_platform() {
        assert_eq!(run_checks("js"), Ok(()));
    }

    #[test]
    fn self_test_passes_for_platform_needing_escapes() {
        assert_eq!(run_checks("we\u{301}b\t'v2'"), Ok(()));
    }
}
