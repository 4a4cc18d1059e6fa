//! decon - GPU deconvolution command line
//!
//! Batch Richardson-Lucy deconvolution, OTF generation, and geometric
//! transforms for volumetric microscopy stacks.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use decon_compute::{
    decon_batch, deskew_gpu, make_otf, rotate_gpu, BatchConfig, Background, DeconOptions,
    GpuDevice, OtfConfig, PadValue, PsfSource, SessionConfig,
};
use decon_core::AnyVolume;
use decon_ffi::{CudaDeconLib, LoadOptions, NativeVersion};
use decon_io::{tiff, VolumeSource};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "decon")]
#[command(author, version, about = "GPU deconvolution for volumetric microscopy")]
#[command(long_about = "
GPU-accelerated Richardson-Lucy deconvolution, OTF generation, and
geometric transforms for volumetric microscopy TIFF stacks.

Examples:
  decon run cells.tif --psf psf.tif --iters 10 --background 98
  decon run ./stacks --psf otf.tif --pattern '*560nm*.tif' -o results
  decon run raw.tif --psf psf.tif --deskew 31.5 --save-deskewed
  decon makeotf psf.tif -o psf_otf.tif --wavelength 520
  decon deskew raw.tif --dzdata 0.3 --angle 31.5 --pad-val 98
  decon rotate deskewed.tif --dzdata 0.3 --angle 31.5
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (repeat for debug detail)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    library: LibraryArgs,
}

/// Native library selection, shared by every subcommand.
#[derive(Args)]
struct LibraryArgs {
    /// Path to the deconvolution kernel library
    #[arg(long, global = true, value_name = "PATH")]
    library: Option<PathBuf>,

    /// Path to the OTF generator library
    #[arg(long, global = true, value_name = "PATH")]
    radialft: Option<PathBuf>,

    /// Native library version (selects the ABI variant, e.g. 0.6.0)
    #[arg(long, global = true, value_name = "VERSION")]
    library_version: Option<NativeVersion>,
}

impl LibraryArgs {
    fn load(&self) -> Result<CudaDeconLib> {
        let options = LoadOptions {
            library: self.library.clone(),
            radialft: self.radialft.clone(),
            version: self.library_version,
        };
        CudaDeconLib::load(&options).context("failed to load the native GPU libraries")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Batch Richardson-Lucy deconvolution
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Generate a radially averaged OTF from a PSF stack
    Makeotf(MakeotfArgs),

    /// Deskew a stage-scanned stack
    Deskew(DeskewArgs),

    /// Rotate a stack about the Y axis
    Rotate(RotateArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Input stack(s): files and/or directories
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// PSF stack or pre-made OTF file
    #[arg(short, long)]
    psf: PathBuf,

    /// Filename pattern for directory inputs
    #[arg(long, default_value = decon_io::DEFAULT_PATTERN)]
    pattern: String,

    /// Output directory (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Richardson-Lucy iteration count
    #[arg(short = 'n', long, default_value_t = 10)]
    iters: u32,

    /// Background to subtract
    #[arg(short, long, default_value_t = 80.0)]
    background: f32,

    /// Use the median of the last Z plane as background
    #[arg(long, conflicts_with = "background")]
    auto_background: bool,

    /// Also write the deskewed raw intermediate
    #[arg(long)]
    save_deskewed: bool,

    /// Edge-softening width in pixels
    #[arg(long, default_value_t = 15)]
    napodize: u32,

    /// Top/bottom sections blended to damp axial ringing
    #[arg(long, default_value_t = 0)]
    nz_blend: u32,

    /// Padding value used while deskewing
    #[arg(long, default_value_t = 0.0)]
    pad_val: f32,

    /// Extra X shift of the deskewed output
    #[arg(long, default_value_t = 0)]
    shift: i32,

    /// Duplicate a reversed stack before decon to damp axial ringing
    #[arg(long)]
    dup_rev_z: bool,

    #[command(flatten)]
    geometry: GeometryArgs,

    #[command(flatten)]
    otf: OtfArgs,
}

/// Session geometry and calibration.
#[derive(Args)]
struct GeometryArgs {
    /// Data Z-step size in microns
    #[arg(long, default_value_t = 0.5)]
    dzdata: f32,

    /// Data XY pixel size in microns
    #[arg(long, default_value_t = 0.1)]
    dxdata: f32,

    /// Deskew angle in degrees (0 = off)
    #[arg(long, default_value_t = 0.0)]
    deskew: f32,

    /// Rotation angle in degrees applied after decon (0 = off)
    #[arg(long, default_value_t = 0.0)]
    rotate: f32,

    /// Output width override (0 = derive from deskew geometry)
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Deconvolve in skewed space (requires a >= 0.6 library)
    #[arg(long)]
    skewed_decon: bool,
}

/// OTF generation parameters.
#[derive(Args)]
struct OtfArgs {
    /// PSF Z-step size in microns
    #[arg(long, default_value_t = 0.1)]
    dzpsf: f32,

    /// PSF XY pixel size in microns
    #[arg(long, default_value_t = 0.1)]
    dxpsf: f32,

    /// Emission wavelength in nanometers
    #[arg(long, default_value_t = 520)]
    wavelength: u32,

    /// Numerical aperture
    #[arg(long, default_value_t = 1.25)]
    na: f32,

    /// Refractive index of the immersion medium
    #[arg(long, default_value_t = 1.3)]
    nimm: f32,

    /// OTF background to subtract (default: autodetect)
    #[arg(long, value_name = "VALUE")]
    otf_bgrd: Option<f32>,

    /// Zero pixels outside this radial limit (0 = derive from NA/NIMM)
    #[arg(long, default_value_t = 0)]
    krmax: u32,

    /// Extrapolate kr=1..=N to fix the kr=0 origin value
    #[arg(long, default_value_t = 10)]
    fixorigin: u32,

    /// Clean up outside the OTF support
    #[arg(long)]
    cleanup_otf: bool,

    /// OTF byte budget for PSF capping (0 = unlimited)
    #[arg(long, default_value_t = decon_compute::DEFAULT_MAX_OTF_SIZE)]
    max_otf_size: usize,
}

impl OtfArgs {
    fn to_config(&self) -> OtfConfig {
        OtfConfig {
            dzpsf: self.dzpsf,
            dxpsf: self.dxpsf,
            wavelength_nm: self.wavelength,
            na: self.na,
            nimm: self.nimm,
            background: self.otf_bgrd,
            krmax: self.krmax,
            fixorigin: self.fixorigin,
            cleanup: self.cleanup_otf,
            max_otf_size: (self.max_otf_size > 0).then_some(self.max_otf_size),
        }
    }
}

#[derive(Args)]
struct MakeotfArgs {
    /// PSF stack
    psf: PathBuf,

    /// Output OTF path (default: <psf stem>_otf.tif)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    otf: OtfArgs,
}

#[derive(Args)]
struct DeskewArgs {
    /// Input stack
    input: PathBuf,

    /// Output path (default: <input stem>_deskewed.tif)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Z-step size in microns
    #[arg(long, default_value_t = 0.5)]
    dzdata: f32,

    /// XY pixel size in microns
    #[arg(long, default_value_t = 0.1)]
    dxdata: f32,

    /// Deskew angle in degrees
    #[arg(long, default_value_t = 31.5)]
    angle: f32,

    /// Output width (0 = derive from geometry)
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Extra X shift
    #[arg(long, default_value_t = 0)]
    shift: i32,

    /// Padding value (default: median of the last Z plane)
    #[arg(long)]
    pad_val: Option<f32>,
}

#[derive(Args)]
struct RotateArgs {
    /// Input stack
    input: PathBuf,

    /// Output path (default: <input stem>_rotated.tif)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Z-step size in microns
    #[arg(long)]
    dzdata: f32,

    /// XY pixel size in microns
    #[arg(long, default_value_t = 0.1)]
    dxdata: f32,

    /// Rotation angle in degrees
    #[arg(long, default_value_t = 31.5)]
    angle: f32,

    /// Rotate in the opposite direction
    #[arg(long)]
    reverse: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Run(args) => run(&cli.library, args),
        Commands::Makeotf(args) => makeotf(&cli.library, args),
        Commands::Deskew(args) => deskew(&cli.library, args),
        Commands::Rotate(args) => rotate(&cli.library, args),
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Expands files and directories into the flat list of stack files, in
/// processing order, so outputs can be named after their inputs.
fn expand_inputs(inputs: &[PathBuf], pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = glob::Pattern::new(pattern)
        .with_context(|| format!("invalid filename pattern {pattern:?}"))?;
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut matched: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("cannot read directory {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| pattern.matches(n))
                })
                .collect();
            anyhow::ensure!(
                !matched.is_empty(),
                "no files matching {:?} in {}",
                pattern.as_str(),
                input.display()
            );
            matched.sort();
            files.extend(matched);
        } else {
            anyhow::bail!("no such file or directory: {}", input.display());
        }
    }
    Ok(files)
}

fn output_path(input: &Path, out_dir: Option<&Path>, suffix: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let name = format!("{stem}_{suffix}.tif");
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

fn run(library: &LibraryArgs, args: &RunArgs) -> Result<()> {
    let files = expand_inputs(&args.input, &args.pattern)?;
    info!(count = files.len(), "deconvolving stacks");

    let mut device = GpuDevice::new(library.load()?);
    let config = BatchConfig {
        session: SessionConfig {
            dxdata: args.geometry.dxdata,
            dzdata: args.geometry.dzdata,
            dxpsf: args.otf.dxpsf,
            dzpsf: args.otf.dzpsf,
            deskew: args.geometry.deskew,
            rotate: args.geometry.rotate,
            width: args.geometry.width,
            skewed_decon: args.geometry.skewed_decon,
        },
        options: DeconOptions {
            background: if args.auto_background {
                Background::Auto
            } else {
                Background::Value(args.background)
            },
            n_iters: args.iters,
            shift: args.shift,
            save_deskewed: args.save_deskewed,
            napodize: args.napodize,
            nz_blend: args.nz_blend,
            pad_val: args.pad_val,
            dup_rev_z: args.dup_rev_z,
        },
        otf: args.otf.to_config(),
        pattern: args.pattern.clone(),
    };

    let source = VolumeSource::List(files.iter().map(|p| p.as_path().into()).collect());
    let results = decon_batch(&mut device, source, PsfSource::from(args.psf.as_path()), &config)
        .context("batch deconvolution failed")?;

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create output directory {}", dir.display()))?;
    }
    for (input, result) in files.iter().zip(results.into_vec()) {
        let out = output_path(input, args.output.as_deref(), "decon");
        tiff::write_volume(&out, &AnyVolume::F32(result.decon))
            .with_context(|| format!("cannot write {}", out.display()))?;
        println!("{} -> {}", input.display(), out.display());

        if let Some(deskewed) = result.deskewed {
            let out = output_path(input, args.output.as_deref(), "deskewed");
            tiff::write_volume(&out, &AnyVolume::F32(deskewed))
                .with_context(|| format!("cannot write {}", out.display()))?;
            println!("{} -> {}", input.display(), out.display());
        }
    }
    Ok(())
}

fn makeotf(library: &LibraryArgs, args: &MakeotfArgs) -> Result<()> {
    let out = args
        .output
        .clone()
        .unwrap_or_else(|| output_path(&args.psf, None, "otf"));
    let backend = library.load()?;
    make_otf(
        &backend,
        &PsfSource::from(args.psf.as_path()),
        &out,
        &args.otf.to_config(),
    )
    .context("OTF generation failed")?;
    println!("{} -> {}", args.psf.display(), out.display());
    Ok(())
}

fn deskew(library: &LibraryArgs, args: &DeskewArgs) -> Result<()> {
    let backend = library.load()?;
    let pad = match args.pad_val {
        Some(v) => PadValue::Value(v),
        None => PadValue::Auto,
    };
    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| output_path(&args.input, None, "deskewed"));

    let result = match tiff::read_volume(&args.input)? {
        AnyVolume::U16(v) => AnyVolume::U16(deskew_gpu(
            &backend,
            &v,
            args.dxdata,
            args.dzdata,
            args.angle,
            args.width,
            args.shift,
            pad,
        )?),
        AnyVolume::F32(v) => AnyVolume::F32(deskew_gpu(
            &backend,
            &v,
            args.dxdata,
            args.dzdata,
            args.angle,
            args.width,
            args.shift,
            pad,
        )?),
    };
    tiff::write_volume(&out_path, &result)
        .with_context(|| format!("cannot write {}", out_path.display()))?;
    println!("{} -> {}", args.input.display(), out_path.display());
    Ok(())
}

fn rotate(library: &LibraryArgs, args: &RotateArgs) -> Result<()> {
    let backend = library.load()?;
    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| output_path(&args.input, None, "rotated"));

    let result = match tiff::read_volume(&args.input)? {
        AnyVolume::U16(v) => {
            rotate_gpu(&backend, &v, args.dzdata, args.dxdata, args.angle, args.reverse)?
        }
        AnyVolume::F32(v) => {
            rotate_gpu(&backend, &v, args.dzdata, args.dxdata, args.angle, args.reverse)?
        }
    };
    tiff::write_volume(&out_path, &AnyVolume::F32(result))
        .with_context(|| format!("cannot write {}", out_path.display()))?;
    println!("{} -> {}", args.input.display(), out_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_appends_suffix() {
        let out = output_path(Path::new("/data/cells.tif"), None, "decon");
        assert_eq!(out, PathBuf::from("/data/cells_decon.tif"));

        let out = output_path(Path::new("/data/cells.tif"), Some(Path::new("/out")), "decon");
        assert_eq!(out, PathBuf::from("/out/cells_decon.tif"));
    }

    #[test]
    fn cli_parses_a_typical_run() {
        let cli = Cli::try_parse_from([
            "decon",
            "run",
            "cells.tif",
            "--psf",
            "psf.tif",
            "--iters",
            "12",
            "--auto-background",
            "--deskew",
            "31.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.iters, 12);
                assert!(args.auto_background);
                assert_eq!(args.geometry.deskew, 31.5);
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn background_and_auto_background_conflict() {
        let result = Cli::try_parse_from([
            "decon",
            "run",
            "cells.tif",
            "--psf",
            "psf.tif",
            "--background",
            "98",
            "--auto-background",
        ]);
        assert!(result.is_err());
    }
}
