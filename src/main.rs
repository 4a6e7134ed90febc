use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vidshrink::size::{calculate_savings, format_file_size, DEFAULT_COST_PER_MB};
use vidshrink::{
    CodecProfile, CompressOptions, Compressor, FfmpegBackend, Output, ProgressEvent, SourceAsset,
};

#[derive(Parser)]
#[command(name = "vidshrink")]
#[command(author, version, about = "Shrink oversized videos locally")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to ffmpeg executable
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a video when it is larger than the target size
    Compress {
        /// Video file to compress
        #[arg(required = true)]
        input: PathBuf,

        /// Files at or below this size are left alone (e.g. 5MB, 800KB)
        #[arg(long, value_parser = parse_size)]
        target_size: Option<u64>,

        /// Upload limit, only reported
        #[arg(long, value_parser = parse_size)]
        max_size: Option<u64>,

        /// Target bitrate in bits per second
        #[arg(long)]
        bitrate: Option<u32>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<f64>,

        /// Output resolution as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<(u32, u32)>,

        /// H.264 profile: baseline, main or high
        #[arg(long, value_parser = parse_profile)]
        profile: Option<CodecProfile>,

        /// Directory for the compressed file (defaults to the input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Show the detected ffmpeg toolchain
    Probe,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "vidshrink=debug" } else { "vidshrink=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Compress {
            input,
            target_size,
            max_size,
            bitrate,
            fps,
            resolution,
            profile,
            output_dir,
        } => {
            let mut options = CompressOptions {
                framerate: fps,
                resolution,
                ffmpeg_path: cli.ffmpeg,
                ..Default::default()
            };
            if let Some(size) = target_size {
                options.target_size = size;
                options.max_size = options.max_size.max(size);
            }
            if let Some(size) = max_size {
                options.max_size = size;
            }
            if let Some(bitrate) = bitrate {
                options.bitrate = bitrate;
            }
            if let Some(profile) = profile {
                options.profile = profile;
            }
            compress(input, output_dir, options)
        }
        Commands::Probe => probe(cli.ffmpeg),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn compress(
    input: PathBuf,
    output_dir: Option<PathBuf>,
    options: CompressOptions,
) -> vidshrink::Result<()> {
    let asset = SourceAsset::open(&input)?;
    let output_dir = output_dir
        .or_else(|| input.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    let compressor = Compressor::new(FfmpegBackend::new(options.ffmpeg_path.clone()), options);
    let output = compressor.compress(&asset, print_progress)?;
    eprintln!();

    match output {
        Output::Original(original) => {
            println!(
                "{} is {} and already below the target, nothing to do",
                original.name(),
                format_file_size(original.size())
            );
        }
        Output::Compressed(compressed) => {
            let destination = output_dir.join(&compressed.name);
            if destination.exists() && destination.canonicalize()? == input.canonicalize()? {
                return Err(vidshrink::Error::InvalidInput(format!(
                    "output would overwrite the source: {}",
                    destination.display()
                )));
            }
            let path = compressed.write_to(&output_dir)?;
            let report = compressed.report;
            println!(
                "{} -> {} ({} -> {}, {} frames, {} dropped)",
                asset.name(),
                path.display(),
                format_file_size(report.original_size),
                format_file_size(report.compressed_size),
                report.samples_written,
                report.frames_dropped
            );
            println!(
                "{}",
                calculate_savings(
                    report.original_size,
                    report.compressed_size,
                    DEFAULT_COST_PER_MB
                )
            );
        }
    }
    Ok(())
}

fn print_progress(event: ProgressEvent) {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "\r{:>12} {:>3}%", event.stage, event.percent);
    let _ = stderr.flush();
}

fn probe(ffmpeg: Option<PathBuf>) -> vidshrink::Result<()> {
    let report = FfmpegBackend::new(ffmpeg).probe_details();

    if let Some(toolchain) = &report.toolchain {
        println!("ffmpeg:  {}", toolchain.ffmpeg.display());
        println!("ffprobe: {}", toolchain.ffprobe.display());
        if let Some(version) = &toolchain.version {
            println!("version: {}", version);
        }
        println!("libx264: {}", if toolchain.has_libx264 { "yes" } else { "no" });
    }

    if report.supported {
        println!("compression supported");
        Ok(())
    } else {
        Err(vidshrink::Error::UnsupportedEnvironment(
            report.reason.unwrap_or_else(|| "unknown reason".to_string()),
        ))
    }
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let (number, multiplier) = [("GB", 1u64 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)]
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n.trim(), *mult)))
        .unwrap_or((upper.as_str(), 1));

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid size: {}", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid size: {}", s));
    }
    Ok((value * multiplier as f64).round() as u64)
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {}", s))?;
    let w = w.trim().parse().map_err(|_| format!("invalid width: {}", w))?;
    let h = h.trim().parse().map_err(|_| format!("invalid height: {}", h))?;
    Ok((w, h))
}

fn parse_profile(s: &str) -> Result<CodecProfile, String> {
    match s.to_ascii_lowercase().as_str() {
        "baseline" => Ok(CodecProfile::Baseline),
        "main" => Ok(CodecProfile::Main),
        "high" => Ok(CodecProfile::High),
        _ => Err(format!("unknown profile: {}", s)),
    }
}
