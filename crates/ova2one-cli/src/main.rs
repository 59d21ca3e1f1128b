//! ova2one CLI - Import OVA packages into OpenNebula.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ova2one_core::{
    config, convert_ova, get_ovf_info, submit_ova, CliPlatform, ConversionPhase, ConvertOptions,
    DiskMaterialization, DryRunPlatform, Platform, ProgressCallback,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Convert OVA packages into OpenNebula VM templates.
#[derive(Parser)]
#[command(name = "ova2one")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the disk images and print the VM template.
    Convert {
        #[command(flatten)]
        args: ConvertArgs,

        /// Write the template to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Register the disk images and the VM template.
    Submit {
        #[command(flatten)]
        args: ConvertArgs,
    },

    /// Display the virtual hardware of an OVA or OVF.
    Info {
        /// Path to the OVA or OVF file.
        input: PathBuf,
    },
}

#[derive(Args)]
struct ConvertArgs {
    /// Path to the OVA or OVF file.
    input: PathBuf,

    /// Configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Datastore to register images in.
    #[arg(short, long)]
    datastore: Option<u32>,

    /// Directory to extract the OVA into.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Copy disk files instead of symlinking them.
    #[arg(long)]
    copy: bool,

    /// Skip the manifest checksum verification.
    #[arg(long)]
    no_verify: bool,

    /// Do not contact the platform; hand out placeholder image ids.
    #[arg(long)]
    dry_run: bool,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,
}

impl ConvertArgs {
    fn options(&self) -> Result<ConvertOptions> {
        let mut options = match &self.config {
            Some(path) => config::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ConvertOptions::default(),
        };

        if let Some(datastore) = self.datastore {
            options.datastore_id = datastore;
        }
        if let Some(work_dir) = &self.work_dir {
            options.work_dir = Some(work_dir.clone());
        }
        if self.copy {
            options.disk_materialization = DiskMaterialization::Copy;
        }
        if self.no_verify {
            options.verify_manifest = false;
        }

        Ok(options)
    }

    fn platform(&self, options: &ConvertOptions) -> Result<Box<dyn Platform>> {
        if self.dry_run {
            Ok(Box::new(DryRunPlatform::new()))
        } else {
            Ok(Box::new(CliPlatform::new(&options.platform)?))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    set_tracing_subscriber(cli.verbose)?;

    match cli.command {
        Commands::Convert { args, output } => {
            run_convert(&args, output.as_deref())?;
        }
        Commands::Submit { args } => {
            run_submit(&args)?;
        }
        Commands::Info { input } => {
            show_info(&input)?;
        }
    }

    Ok(())
}

/// Log to stderr so templates written to stdout stay clean.
fn set_tracing_subscriber(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let subscriber = Registry::default().with(filter).with(stderr_log);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn phase_message(phase: ConversionPhase) -> &'static str {
    match phase {
        ConversionPhase::Unpacked => "Parsing descriptor...",
        ConversionPhase::Parsed => "Registering images...",
        ConversionPhase::ImagesRegistered => "Mapping disks...",
        ConversionPhase::Mapped => "Rendering template...",
        ConversionPhase::Rendered => "Complete!",
    }
}

/// Spinner driven by the conversion phases, or nothing when quiet.
fn progress(quiet: bool) -> Result<(Option<ProgressBar>, Option<ProgressCallback>)> {
    if quiet {
        return Ok((None, None));
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Unpacking...");

    let handle = spinner.clone();
    let callback: ProgressCallback = Box::new(move |phase: ConversionPhase| {
        handle.set_message(phase_message(phase));
    });

    Ok((Some(spinner), Some(callback)))
}

fn run_convert(args: &ConvertArgs, output: Option<&Path>) -> Result<()> {
    let options = args.options()?;
    let mut platform = args.platform(&options)?;
    let (spinner, callback) = progress(args.quiet)?;

    let result = convert_ova(&args.input, platform.as_mut(), &options, callback);
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    let conversion =
        result.with_context(|| format!("Couldn't transform OVF: {}", args.input.display()))?;

    if !args.quiet {
        for image in &conversion.images {
            eprintln!("Image {} -> {}", image.file_name, image.image_id);
        }
    }

    match output {
        Some(path) => {
            std::fs::write(path, &conversion.template)
                .with_context(|| format!("Failed to write template: {}", path.display()))?;
            if !args.quiet {
                eprintln!("Template written to {}", path.display());
            }
        }
        None => print!("{}", conversion.template),
    }

    Ok(())
}

fn run_submit(args: &ConvertArgs) -> Result<()> {
    let options = args.options()?;
    let mut platform = args.platform(&options)?;
    let (spinner, callback) = progress(args.quiet)?;

    let result = submit_ova(&args.input, platform.as_mut(), &options, callback);
    if let Some(spinner) = &spinner {
        spinner.finish_and_clear();
    }
    let (conversion, template_id) =
        result.with_context(|| format!("Couldn't transform OVF: {}", args.input.display()))?;

    if !args.quiet {
        for image in &conversion.images {
            eprintln!("Image {} -> {}", image.file_name, image.image_id);
        }
    }
    println!("ID: {}", template_id);

    Ok(())
}

fn show_info(input: &Path) -> Result<()> {
    let info = get_ovf_info(input)?;

    println!("VM Information");
    println!("==============");
    println!();
    println!("Name:      {}", info.name);
    println!("CPUs:      {}", info.capacity.cpu);
    println!("Memory:    {}", info.capacity.memory);
    println!();

    if info.disks.is_empty() {
        println!("Disks:     None");
    } else {
        println!("Disks:");
        for (i, disk) in info.disks.iter().enumerate() {
            println!(
                "  {}. {} ({}) - {}",
                i + 1,
                disk.target,
                disk.bus,
                disk.file_name.as_deref().unwrap_or("<unresolved>")
            );
        }
    }

    if !info.nics.is_empty() {
        println!();
        println!("NICs:");
        for (i, nic) in info.nics.iter().enumerate() {
            println!(
                "  {}. {} ({})",
                i + 1,
                nic.network,
                nic.model.as_deref().unwrap_or("default model")
            );
        }
    }

    if !info.controllers.is_empty() {
        println!();
        println!("Controllers:");
        for controller in &info.controllers {
            println!(
                "  scsi index {} {}",
                controller.address,
                controller.model.as_deref().unwrap_or("")
            );
        }
    }

    if !info.cdroms.is_empty() {
        println!();
        println!("CD-ROMs:   {} (not mapped)", info.cdroms.len());
    }

    Ok(())
}
