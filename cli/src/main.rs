use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use e4defrag_core::{DefragError, DefragOptions};
use e4defrag_force::FileReport;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "e4defrag")]
#[command(about = "Online defragmenter for ext4 files", long_about = None)]
struct Cli {
    /// Report progress and extent counts
    #[arg(short, long)]
    verbose: bool,

    /// Pack a file into its own block group, moving other data out of the way
    /// when no contiguous space is left
    #[arg(short, long)]
    force: bool,

    /// Preferred block for data moved out of the way (implies --force)
    #[arg(long, value_name = "BLOCK")]
    goal: Option<u64>,

    /// JSON file with defrag options; command line flags take precedence
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Regular files to defragment
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn load_options(cli: &Cli) -> anyhow::Result<DefragOptions> {
    let mut options = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
            DefragOptions::from_json(&text)?
        }
        None => DefragOptions::default(),
    };

    if cli.verbose {
        options.verbose = true;
    }
    if cli.force {
        options.force = true;
    }
    if let Some(goal) = cli.goal {
        options.force = true;
        options.victim_goal = Some(goal);
    }
    options.validate()?;
    Ok(options)
}

#[cfg(target_os = "linux")]
fn defrag_path(path: &Path, options: &DefragOptions) -> anyhow::Result<FileReport> {
    use e4defrag_force::Defragmenter;
    use e4defrag_platform::{PlatformEngine, PlatformPageCache};

    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(DefragError::NotRegularFile(path.display().to_string()).into());
    }

    let engine = PlatformEngine::open(path)?;
    let info = engine.file_info()?;
    let cache = PlatformPageCache::new(engine.try_clone_file()?, info.block_size);
    let mut defragmenter = Defragmenter::new(engine, cache, options.clone())?;
    Ok(defragmenter.defrag_file(&info)?)
}

#[cfg(not(target_os = "linux"))]
fn defrag_path(_path: &Path, _options: &DefragOptions) -> anyhow::Result<FileReport> {
    anyhow::bail!("ext4 online defrag is only available on Linux")
}

fn describe(path: &Path, report: &FileReport) -> String {
    let mut line = format!("{}: {} blocks moved", path.display(), report.blocks_moved);
    if report.forced {
        line.push_str(" (force mode)");
    }
    if let (Some(before), Some(after)) = (report.extents_before, report.extents_after) {
        line.push_str(&format!(", extents {} -> {}", before, after));
    }
    line
}

fn summary(succeeded: usize, total: usize) -> [String; 3] {
    [
        format!("\tTotal:\t\t[ {} ]", total),
        format!("\tSuccess:\t[ {}/{} ]", succeeded, total),
        format!("\tFailure:\t[ {}/{} ]", total - succeeded, total),
    ]
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let options = match load_options(&cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("options: {:?}", options);

    let total = cli.files.len();
    let mut succeeded = 0;
    for path in &cli.files {
        match defrag_path(path, &options) {
            Ok(report) => {
                succeeded += 1;
                println!("[ OK ] {}", describe(path, &report));
            }
            Err(e) => {
                error!("{}: {:#}", path.display(), e);
                println!("[ NG ] {}: {}", path.display(), e);
            }
        }
    }

    println!();
    for line in summary(succeeded, total) {
        println!("{}", line);
    }

    if succeeded > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
