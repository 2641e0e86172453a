use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tuberseg_core::config::SETTINGS_FILE;
use tuberseg_core::{ProjectLayout, RunLog, Settings};
use tuberseg_runner::{execute_stage, run_pipeline, stage_name};
use tuberseg_runtime::{gpu_available, ContainerRuntime, GpuMode};

#[derive(Parser)]
#[command(name = "tuberseg", version, about = "TSC tuber segmentation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline, resuming past stages with existing output
    ///
    /// Interrupting a run (Ctrl-C) exits with code 130 once the current
    /// stage process stops. A container already launched by that stage
    /// is not reaped here; stop it through the container engine if it
    /// keeps running.
    Run {
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        /// First stage to evaluate (earlier stages are not even checked)
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(usize))]
        start_from: usize,
        /// Rerun stages even when their output already exists
        #[arg(long)]
        force: bool,
    },
    /// Run a single stage in this process
    RunStage {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
        stage: u8,
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        /// Disable GPU even if one is available
        #[arg(long)]
        no_gpu: bool,
    },
    /// Check container runtime, GPU and image availability
    TestRuntime {
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
        /// Check every stage image instead of just the first
        #[arg(long)]
        all: bool,
    },
    /// Create the project directory skeleton and a settings template
    Init {
        #[arg(long, default_value = ".")]
        project_root: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match run_command(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // Logging may not be initialized yet when setup fails.
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn load_project(project_root: &Path) -> Result<(ProjectLayout, Settings)> {
    let settings = Settings::load(project_root)?;
    let layout = ProjectLayout::from_project_root(project_root, &settings);
    layout.ensure_directories()?;
    Ok((layout, settings))
}

fn run_command(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            project_root,
            start_from,
            force,
        } => {
            if start_from > 4 {
                bail!("--start-from must be 0..=4, got {start_from}");
            }
            let (layout, _settings) = load_project(&project_root)?;
            let log = RunLog::init("pipeline", &layout.logs_dir)?;
            info!("log file: {}", log.log_path.display());

            let (exit, _report) = run_pipeline(&layout, start_from, force)?;
            Ok(exit.code())
        }
        Commands::RunStage {
            stage,
            project_root,
            no_gpu,
        } => {
            let stage = stage as usize;
            let (layout, settings) = load_project(&project_root)?;
            let name = stage_name(stage).unwrap_or("stage");
            let log = RunLog::init(&format!("{}_{}", stage, name), &layout.logs_dir)?;
            info!("log file: {}", log.log_path.display());

            let gpu = if no_gpu {
                GpuMode::ForceOff
            } else {
                GpuMode::from_env()
            };
            let report = execute_stage(stage, &layout, &settings, gpu)?;
            Ok(if report.exit_ok() { 0 } else { 1 })
        }
        Commands::TestRuntime { project_root, all } => {
            let (layout, settings) = load_project(&project_root)?;
            let log = RunLog::init("test_runtime", &layout.logs_dir)?;
            info!("log file: {}", log.log_path.display());

            Ok(test_runtime(&settings, all))
        }
        Commands::Init { project_root } => {
            let (layout, _settings) = load_project(&project_root)?;
            println!("created: {}", layout.preprocessing_dir.display());
            println!("created: {}", layout.results_dir.display());
            println!("created: {}", layout.logs_dir.display());

            if !layout.input_dir.exists() {
                tuberseg_core::ensure_dir(&layout.input_dir)?;
                println!("created: {}", layout.input_dir.display());
            }

            let settings_path = layout.project_root.join(SETTINGS_FILE);
            if settings_path.exists() {
                println!("kept existing: {}", settings_path.display());
            } else {
                std::fs::write(&settings_path, SETTINGS_TEMPLATE)?;
                println!("wrote: {}", settings_path.display());
            }
            println!(
                "next: place subject directories under {} and run `tuberseg run`",
                layout.input_dir.display()
            );
            Ok(0)
        }
    }
}

fn test_runtime(settings: &Settings, all: bool) -> i32 {
    let runtime = match ContainerRuntime::detect() {
        Ok(runtime) => {
            info!("container runtime: {}", runtime.engine());
            runtime
        }
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };

    if gpu_available() {
        info!("GPU: NVIDIA GPU detected");
    } else {
        info!("GPU: not available, stages will run on CPU");
    }

    let images = settings.stage_images();
    let to_check: &[(&str, &str)] = if all { &images } else { &images[..1] };
    let mut failed = false;
    for (name, image) in to_check {
        match runtime.ensure_image(image) {
            Ok(()) => info!("image ok ({name}): {image}"),
            Err(err) => {
                warn!("image unavailable ({name}): {err}");
                failed = true;
            }
        }
    }
    if failed {
        1
    } else {
        info!("runtime check passed");
        0
    }
}

const SETTINGS_TEMPLATE: &str = "\
# tuberseg settings (all fields optional; defaults shown)
#
# input_dir: TSC_MRI_SUB
#
# images:
#   skull_strip: ivansanchezfernandez/skull_strip_and_create_masks_with_synthstrip
#   combine_t2: ivansanchezfernandez/combine_t2_files_with_niftymic
#   register: ivansanchezfernandez/bias_correct_resample_and_register_to_mni_with_ants
#   segment: ivansanchezfernandez/segment_tubers_and_quantify_tuber_burden_with_tsccnn3d_dropout
{}
";
