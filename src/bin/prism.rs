//! The `prism` command-line binary (SPEC_FULL.md §4.8): `profile` clones a
//! project, analyzes and patches it, then optionally builds and runs it;
//! `diff` loads two or more captured profiles and renders a comparison
//! table.
//!
//! Grounded on `cmd/profile.go` (`ProfileProject`/`cloneProject`) and
//! `cmd/diff.go` (`DiffProfiles`) in original_source. The original uses
//! `github.com/codegangsta/cli`; this binary uses `clap`'s derive API, the
//! only CLI-parsing crate this codebase or the wider pack reaches for.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};

use clap::{Parser, Subcommand};

use prism::analyzer::Analyzer;
use prism::display::{self, Column, DisplayFormat, DisplayUnit};
use prism::error::PrismError;
use prism::patcher::{BootstrapPlan, Patcher};
use prism::tree::Profile;

#[derive(Parser)]
#[command(name = "prism", about = "Source-level function profiler for Rust projects")]
struct Cli {
    #[command(subcommand)]
    command: PrismCommand,
}

#[derive(Subcommand)]
enum PrismCommand {
    /// Clone, instrument, and (optionally) run a project.
    Profile(ProfileArgs),
    /// Correlate two or more captured profiles and render a diff table.
    Diff(DiffArgs),
}

#[derive(Parser)]
struct ProfileArgs {
    /// Path to the project's entry-point source file (e.g. `src/main.rs`).
    path: PathBuf,

    /// Qualified target function name, e.g. `pkg.Handler`. Repeatable.
    #[arg(long = "target", num_args = 1, required = true)]
    targets: Vec<String>,

    /// A vendored crate name prefix to include despite being under
    /// `vendor/`. Repeatable.
    #[arg(long = "vendored-pkg", num_args = 1)]
    vendored_pkgs: Vec<String>,

    /// Directory to clone the instrumented copy into (a fresh `prism-*`
    /// tempdir is used when omitted).
    #[arg(long = "output-folder")]
    output_folder: Option<PathBuf>,

    /// Label stamped onto every profile produced by the instrumented run.
    #[arg(long)]
    label: Option<String>,

    /// Shell command to build the cloned project before running it.
    #[arg(long = "build-cmd")]
    build_cmd: Option<String>,

    /// Shell command to run the instrumented binary.
    #[arg(long = "run-cmd")]
    run_cmd: Option<String>,

    /// Keep the cloned/patched copy on disk instead of deleting it on exit.
    #[arg(long = "preserve-output")]
    preserve_output: bool,
}

#[derive(Parser)]
struct DiffArgs {
    /// Captured profile JSON files; the first is the baseline. At least two
    /// are required.
    #[arg(required = true, num_args = 2..)]
    profiles: Vec<PathBuf>,

    #[arg(long = "display-format", default_value = "time")]
    display_format: String,

    #[arg(long = "display-unit", default_value = "auto")]
    display_unit: String,

    #[arg(long = "display-columns", default_value = "total,mean,invocations")]
    display_columns: String,

    #[arg(long = "display-threshold", default_value_t = 0.05)]
    display_threshold: f64,

    /// Strip ANSI color even if stdout is a terminal.
    #[arg(long = "no-ansi")]
    no_ansi: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = match cli.command {
        PrismCommand::Profile(args) => run_profile(args),
        PrismCommand::Diff(args) => run_diff(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("prism: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_profile(args: ProfileArgs) -> prism::error::Result<()> {
    let entry_path = args.path.canonicalize().map_err(PrismError::Io)?;
    let orig_project_root = entry_path
        .parent()
        .ok_or_else(|| PrismError::InvalidArgument("entry path has no parent directory".into()))?
        .to_path_buf();
    let entry_fn_file_name = entry_path.file_name().expect("canonicalized path has a file name");

    let clone_dir = clone_project(&orig_project_root, args.output_folder.as_deref())?;
    println!("profile: copying project to {}", clone_dir.path().display());

    let cloned_entry = clone_dir.path().join(entry_fn_file_name);

    let analyzer = Analyzer::new(clone_dir.path(), &args.vendored_pkgs)?;
    let targets = analyzer.profile_targets(&args.targets)?;
    println!(
        "profile: call graph analyzed {} target(s) and detected {} location(s) for injecting profiler hooks",
        args.targets.len(),
        targets.len()
    );

    let bootstrap = BootstrapPlan {
        entry_file: cloned_entry,
        entry_fn: "main".to_string(),
        profile_dir: clone_dir.path().join("prism-profiles").display().to_string(),
        profile_label: args.label,
    };
    let summary = Patcher::new().apply(&targets, Some(&bootstrap))?;
    println!("profile: updated {} file(s)", summary.files_modified);

    if let Some(run_cmd) = &args.run_cmd {
        if let Some(build_cmd) = &args.build_cmd {
            run_shell(build_cmd, clone_dir.path())?;
        }
        run_instrumented(run_cmd, clone_dir.path())?;
    }

    if args.preserve_output {
        let kept = clone_dir.into_path();
        println!("profile: preserved instrumented copy at {}", kept.display());
    }

    Ok(())
}

/// Clone `orig_project_root` into a fresh `tempfile`-managed directory (or,
/// if `dest` is given, a `prism-*` directory created under it) so patching
/// never mutates the user's working tree.
fn clone_project(
    orig_project_root: &Path,
    dest: Option<&Path>,
) -> prism::error::Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("prism-");
    let tmp_dir = match dest {
        Some(dest) => builder.tempdir_in(dest).map_err(PrismError::Io)?,
        None => builder.tempdir().map_err(PrismError::Io)?,
    };

    for entry in walkdir::WalkDir::new(orig_project_root) {
        let entry = entry.map_err(|e| PrismError::InvalidArgument(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(orig_project_root)
            .expect("walkdir entries are under the root they were started from");
        let dst_path = tmp_dir.path().join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dst_path).map_err(PrismError::Io)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dst_path.parent() {
                std::fs::create_dir_all(parent).map_err(PrismError::Io)?;
            }
            std::fs::copy(entry.path(), &dst_path).map_err(PrismError::Io)?;
        }
    }

    Ok(tmp_dir)
}

/// Run the instrumented binary, forwarding termination signals to it so a
/// `Ctrl-C`/`SIGTERM` aimed at `prism profile` reaches the child instead of
/// leaving it orphaned.
fn run_instrumented(run_cmd: &str, project_root: &Path) -> prism::error::Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(run_cmd)
        .current_dir(project_root)
        .env("PRISM_PROJECT_ROOT", project_root)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(PrismError::Io)?;

    let pid = child.id() as i32;
    let signal_handle = forward_signals(pid);

    let status = child.wait().map_err(PrismError::Io)?;
    signal_handle.close();

    if !status.success() {
        return Err(PrismError::InvalidArgument(format!(
            "instrumented run exited with status {status}"
        )));
    }
    Ok(())
}

fn run_shell(cmd: &str, dir: &Path) -> prism::error::Result<()> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(dir)
        .status()
        .map_err(PrismError::Io)?;
    if !status.success() {
        return Err(PrismError::InvalidArgument(format!(
            "build command exited with status {status}"
        )));
    }
    Ok(())
}

/// Spawn a background thread forwarding SIGHUP/SIGINT/SIGTERM/SIGQUIT to
/// `pid`. Calling `close()` on the returned handle stops the forwarding
/// thread once the child has exited.
fn forward_signals(pid: i32) -> signal_hook::iterator::Handle {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGHUP, SIGINT, SIGTERM, SIGQUIT]).expect("failed to register signal handlers");
    let handle = signals.handle();
    std::thread::spawn(move || {
        for signal in &mut signals {
            unsafe {
                libc_kill(pid, signal);
            }
        }
    });
    handle
}

/// `kill(2)` without pulling in the `libc` crate for one syscall: the same
/// signal number space `signal-hook` already uses.
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe {
        kill(pid, sig);
    }
}

fn run_diff(args: DiffArgs) -> prism::error::Result<()> {
    if args.profiles.len() < 2 {
        return Err(PrismError::InsufficientProfiles);
    }

    let profiles: Vec<Profile> = args
        .profiles
        .iter()
        .map(|path| {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data).map_err(PrismError::from)
        })
        .collect::<prism::error::Result<_>>()?;

    let format: DisplayFormat = args.display_format.parse()?;
    let unit: DisplayUnit = args.display_unit.parse()?;
    let columns: Vec<Column> = display::parse_columns(&args.display_columns)?;

    let table = display::render(&profiles, format, unit, &columns, args.display_threshold)?;

    let use_color = !args.no_ansi && std::io::stdout().is_terminal();
    if use_color {
        print!("{table}");
    } else {
        print!("{}", display::strip_ansi(&table));
    }

    Ok(())
}
