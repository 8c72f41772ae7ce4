use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use docflow_core::chain::{StageChain, StageRoutes, DEFAULT_STAGE_ORDER};
use docflow_core::contract::StageId;
use docflow_core::coordinator::{
    CoordinatorConfig, InvocationLimits, DEFAULT_MEMORY_MB, DEFAULT_TABLE_NAME,
    DEFAULT_TIMEOUT_SECONDS,
};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "docflow_lambda";
const LAMBDA_BINARY: &str = "stage_runtime";
const DIST_DIR: &str = "infra/docflow/dist";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the document workflow workspace",
    long_about = "A unified CLI for CI checks, Lambda packaging and deployment\n\
                  manifests in the document workflow workspace."
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
    /// Build the stage runtime and zip it as a Lambda `bootstrap`
    LambdaPackage {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Print the per-stage function settings for the deployment
    DeployManifest {
        /// Comma separated stage order
        #[arg(long, env = "STAGE_ORDER", default_value = DEFAULT_STAGE_ORDER)]
        stage_order: String,
        /// DynamoDB table holding workflow state
        #[arg(long, env = "DYNAMODB_TABLE", default_value = DEFAULT_TABLE_NAME)]
        table: String,
        /// Bucket reports are written to
        #[arg(long, env = "REPORT_BUCKET")]
        report_bucket: Option<String>,
        /// Per-stage timeout ceiling
        #[arg(long, env = "STAGE_TIMEOUT_SECONDS", default_value_t = DEFAULT_TIMEOUT_SECONDS)]
        timeout_seconds: u32,
        /// Per-stage memory ceiling
        #[arg(long, env = "STAGE_MEMORY_MB", default_value_t = DEFAULT_MEMORY_MB)]
        memory_mb: u32,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Workspace tests
    Test,
    /// Run lint + test
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

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_stage_runtime(target: &str, profile: BuildProfile) {
    ensure_rust_target_installed(target);

    step("Build stage runtime binary");

    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--target",
        target,
        "--bin",
        LAMBDA_BINARY,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package lambda zip artifact");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let dist_dir = Path::new(DIST_DIR);
    fs::create_dir_all(dist_dir).expect("failed to create lambda dist directory");

    let zip_path = dist_dir.join("stage_runtime.zip");
    package_lambda_zip(&target_dir.join(binary_name(LAMBDA_BINARY, target)), &zip_path);

    // Every stage function deploys the same artifact and selects its role via DOCFLOW_STAGE.
    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- lambda-package`"
        );
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected lambda binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read lambda binary");
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in lambda zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish lambda zip");
}

// ── deployment manifest ────────────────────────────────────────────

/// One block per stage, in chain order, with the environment each function needs.
fn render_manifest(config: &CoordinatorConfig, report_bucket: Option<&str>) -> String {
    let chain = &config.chain;
    let routes = &config.routes;
    let limits = config.limits;
    let order = chain
        .stages()
        .iter()
        .map(|stage| stage.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let mut manifest = String::new();
    for &stage in chain.stages() {
        manifest.push_str(&format!("[{}]\n", routes.function_name(stage)));
        manifest.push_str(&format!("timeout_seconds = {}\n", limits.timeout_seconds));
        manifest.push_str(&format!("memory_mb = {}\n", limits.memory_mb));
        manifest.push_str(&format!("DOCFLOW_STAGE = \"{stage}\"\n"));
        manifest.push_str(&format!("STAGE_ORDER = \"{order}\"\n"));
        manifest.push_str(&format!("DYNAMODB_TABLE = \"{}\"\n", config.table_name));
        manifest.push_str(&format!(
            "STAGE_TIMEOUT_SECONDS = \"{}\"\n",
            limits.timeout_seconds
        ));
        manifest.push_str(&format!("STAGE_MEMORY_MB = \"{}\"\n", limits.memory_mb));
        if let Some(next) = chain.next_after(stage) {
            manifest.push_str(&format!(
                "NEXT_FUNCTION_NAME = \"{}\"\n",
                routes.function_name(next)
            ));
        }
        if stage == StageId::Report {
            let bucket = report_bucket.unwrap_or("<required>");
            manifest.push_str(&format!("REPORT_BUCKET = \"{bucket}\"\n"));
        }
        manifest.push('\n');
    }
    manifest
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
    step("Test docflow_core");
    run_cargo(&["test", "-p", "docflow_core"]);

    step("Test docflow_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);
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
        Commands::LambdaPackage { target, profile } => {
            package_stage_runtime(&target, profile);
        }
        Commands::DeployManifest {
            stage_order,
            table,
            report_bucket,
            timeout_seconds,
            memory_mb,
        } => {
            let chain = match StageChain::parse(&stage_order) {
                Ok(chain) => chain,
                Err(error) => {
                    eprintln!("invalid stage order '{stage_order}': {error}");
                    exit(2);
                }
            };
            let config = CoordinatorConfig {
                table_name: table,
                chain,
                routes: StageRoutes::default(),
                limits: InvocationLimits {
                    timeout_seconds,
                    memory_mb,
                },
            };
            print!("{}", render_manifest(&config, report_bucket.as_deref()));
        }
    }
}
