use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command};

use clap::{Parser, Subcommand, ValueEnum};
use zip::result::ZipResult;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "identity_verifier_lambda";
const LAMBDA_BIN: &str = "verifier_lambda";
const DIST_DIR: &str = "infra/identity_verifier/dist";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the identity verifier workspace",
    long_about = "A unified CLI for packaging the verifier Lambda, bootstrapping\n\
                  sandbox identities, and running CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build and package the verifier Lambda for the deployment templates
    ServerlessPackage {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Create and verify an SES domain identity outside of CloudFormation
    Bootstrap {
        #[arg(long, env = "IDENTITY_DOMAIN")]
        domain: String,
        #[arg(long, env = "IDENTITY_HOSTED_ZONE_ID")]
        hosted_zone_id: String,
        #[arg(long, env = "IDENTITY_HOSTED_ZONE_NAME")]
        hosted_zone_name: Option<String>,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Unit and integration tests
    Test,
    /// Lint + test
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn run_cargo(args: &[&str]) {
    eprintln!("+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo");
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_verifier_lambda(target: &str, profile: BuildProfile) {
    require_rust_target(target);

    step("Build verifier lambda binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--bin",
        LAMBDA_BIN,
        "--target",
        target,
    ];
    cargo_args.extend(profile.as_cargo_flag());
    run_cargo(&cargo_args);

    step("Package lambda zip artifact");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(LAMBDA_BIN);
    let binary = fs::read(&binary_path)
        .unwrap_or_else(|error| panic!("cannot read '{}': {error}", binary_path.display()));

    let dist_dir = Path::new(DIST_DIR);
    fs::create_dir_all(dist_dir).expect("failed to create lambda dist directory");
    let zip_path = dist_dir.join("verifier.zip");
    let file = fs::File::create(&zip_path).expect("failed to create lambda zip");
    write_bootstrap_zip(file, &binary).expect("failed to write lambda zip");

    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
}

/// The provided.al2023 runtime executes the archive entry named `bootstrap`.
fn write_bootstrap_zip(file: fs::File, binary: &[u8]) -> ZipResult<()> {
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)?;
    zip.write_all(binary)?;
    zip.finish()?;
    Ok(())
}

fn require_rust_target(target: &str) {
    let Ok(output) = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    else {
        eprintln!("warning: rustup not found; skipping target preflight for `{target}`");
        return;
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && !installed.lines().any(|line| line.trim() == target) {
        eprintln!("rust target `{target}` is missing; run `rustup target add {target}`");
        exit(1);
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test identity_verifier_core");
    run_cargo(&["test", "-p", "identity_verifier_core"]);

    step("Test identity_verifier_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);

    step("Test xtask");
    run_cargo(&["test", "-p", "xtask"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Lint => ci_lint(),
                CiJob::Test => ci_test(),
                CiJob::Check => {
                    ci_lint();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::ServerlessPackage { target, profile } => {
            package_verifier_lambda(&target, profile);
        }
        Commands::Bootstrap {
            domain,
            hosted_zone_id,
            hosted_zone_name,
        } => {
            let zone_name = hosted_zone_name.unwrap_or_else(|| domain.clone());
            run_cargo(&[
                "run",
                "-p",
                LAMBDA_PACKAGE,
                "--bin",
                "identity_bootstrap",
                "--",
                "--domain",
                &domain,
                "--hosted-zone-id",
                &hosted_zone_id,
                "--hosted-zone-name",
                &zone_name,
            ]);
        }
    }
}
