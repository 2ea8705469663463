use clap::{Parser, Subcommand};
use dualpack::archive::{self, EntryKind, PackObserver, PackOptions, UnpackOptions};
use dualpack::walk::ExclusionPolicy;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dualpack", version, about = "Pack a directory tree into a text container and a binary container")]
struct Cli {
    /// Log debug events (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack every file under ROOT into the two containers
    Pack {
        #[arg(default_value = ".")]
        root: PathBuf,
        /// Directory that receives the containers
        #[arg(short, long, default_value = ".dualpack")]
        output: PathBuf,
        /// Glob that first-level subdirectories must match
        #[arg(short, long)]
        pattern: Option<String>,
        /// Leave out files that sit directly in ROOT
        #[arg(long)]
        no_root_files: bool,
        /// Delete the output directory first
        #[arg(long)]
        clean: bool,
        /// Print the report as JSON instead of progress lines
        #[arg(long)]
        json: bool,
    },
    /// Restore the files stored in a container directory
    Unpack {
        #[arg(default_value = ".dualpack")]
        input: PathBuf,
        #[arg(short = 'C', long, default_value = "unpacked")]
        output_dir: PathBuf,
        /// Refuse to replace files that already exist
        #[arg(long)]
        no_clobber: bool,
        /// Delete the output directory first
        #[arg(long)]
        clean: bool,
        #[arg(long)]
        json: bool,
    },
    /// List container contents without extracting
    List {
        #[arg(default_value = ".dualpack")]
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

/// Prints one line per file unless JSON output was requested.
struct ConsoleObserver {
    verb:  &'static str,
    quiet: bool,
}

impl PackObserver for ConsoleObserver {
    fn on_file_processed(&mut self, relative_path: &str, kind: EntryKind) {
        if self.quiet { return; }
        let tag = match kind {
            EntryKind::Text           => "txt",
            EntryKind::Binary         => "bin",
            EntryKind::BinaryFallback => "bin*",
        };
        println!("  {} {:<4} {}", self.verb, tag, relative_path);
    }

    fn on_file_skipped(&mut self, path: &Path, reason: &str) {
        if self.quiet { return; }
        eprintln!("  skipped  {} ({})", path.display(), reason);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    dualpack::logging::init_tracing(cli.verbose)?;

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { root, output, pattern, no_root_files, clean, json } => {
            let mut exclusion = ExclusionPolicy::default();
            if let Ok(exe) = std::env::current_exe() {
                exclusion = exclusion.exclude_path(exe);
            }
            let opts = PackOptions {
                include_root_files: !no_root_files,
                root_pattern:       pattern,
                exclusion,
                clean_output:       clean,
            };
            let mut observer = ConsoleObserver { verb: "packed", quiet: json };
            let report = archive::pack(&root, &output, &opts, &mut observer)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Packed {} file(s) ({} text, {} binary) to {}",
                    report.total_files(), report.text_files, report.binary_files,
                    output.display());
                if !report.skipped.is_empty() {
                    println!("{} file(s) skipped", report.skipped.len());
                }
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir, no_clobber, clean, json } => {
            let opts = UnpackOptions { overwrite: !no_clobber, clean_output: clean };
            let mut observer = ConsoleObserver { verb: "unpacked", quiet: json };
            let report = archive::unpack(&input, &output_dir, &opts, &mut observer)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for kind in &report.missing {
                    eprintln!("{} not found in {}", kind.file_name(), input.display());
                }
                println!("Unpacked {} file(s) to {}", report.total_files(), output_dir.display());
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let entries = archive::list(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                println!("{:<7} {:>12}  Path", "Kind", "Length");
                for e in &entries {
                    println!("{:<7} {:>12}  {}", e.container, e.length, e.relative_path);
                }
            }
        }
    }

    Ok(())
}
