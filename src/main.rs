//! Command-line front end for the culling core.
//!
//! Four subcommands: inspect a container header, render one exposure to a
//! PNG, batch-generate previews for a folder, and list a folder's files the
//! way the session sees them.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use xisf_selector::decode::{self, xisf, FormatKind};
use xisf_selector::render::tonemap::{tone_map, ToneMapParams};
use xisf_selector::state::session::Session;
use xisf_selector::thumbs::ProgressEvent;
use xisf_selector::{decode_file, DecodeError, Result};

#[derive(Parser)]
#[command(name = "xisf-selector", version, about = "Browse and cull XISF/FITS exposures")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a container's geometry and storage details
    Info {
        file: PathBuf,
        /// Also print the full metadata header text
        #[arg(long)]
        header: bool,
    },
    /// Tone-map one exposure and write it as a PNG
    Render {
        file: PathBuf,
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
        /// Use a stretch preset (0 = linear .. 4 = maximum) instead of the
        /// individual parameters
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=4))]
        preset: Option<u8>,
        #[arg(long, default_value_t = 10_000.0)]
        stretch: f32,
        #[arg(long, default_value_t = 0.7)]
        gamma: f32,
        #[arg(long, default_value_t = 1.0)]
        brightness: f32,
        #[arg(long, default_value_t = 1.5)]
        contrast: f32,
    },
    /// Generate previews for every supported file in a folder
    Thumbs {
        folder: PathBuf,
        /// Write the previews as PNGs into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List a folder's supported files with their sizes
    Ls { folder: PathBuf },
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("❌ {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Info { file, header } => info(&file, header),
        Command::Render { file, output, preset, stretch, gamma, brightness, contrast } => {
            let params = match preset {
                Some(key) => ToneMapParams::preset(key).expect("range checked by clap"),
                None => ToneMapParams { stretch, gamma, brightness, contrast },
            };
            render(&file, &output, &params)
        }
        Command::Thumbs { folder, output } => thumbs(&folder, output.as_deref()),
        Command::Ls { folder } => ls(&folder),
    }
}

fn info(file: &PathBuf, with_header: bool) -> Result<()> {
    let kind = FormatKind::from_path(file).ok_or_else(|| {
        DecodeError::MalformedContainer(format!("unsupported file type: {}", file.display()))
    })?;
    match kind {
        FormatKind::Xisf => {
            let bytes = std::fs::read(file)?;
            let header = xisf::parse_header(&bytes)?;
            println!("format:      XISF");
            println!(
                "geometry:    {}x{}, {} channel(s), UInt16",
                header.width, header.height, header.channels
            );
            println!("compression: {}", header.compression_token);
            println!(
                "payload:     {} bytes at offset {} ({} bytes decompressed)",
                header.compressed_size, header.data_offset, header.uncompressed_size
            );
            if with_header {
                println!("{}", header.xml_header);
            }
        }
        FormatKind::Fits => {
            let image = decode::load_image(file)?;
            println!("format:      FITS");
            println!(
                "geometry:    {}x{}, {} channel(s)",
                image.width, image.height, image.channels
            );
            if with_header {
                println!("{}", image.header_text);
            }
        }
    }
    Ok(())
}

fn render(file: &PathBuf, output: &PathBuf, params: &ToneMapParams) -> Result<()> {
    let image = decode_file(file)?;
    let raster = tone_map(&image, params)?;
    raster
        .save(output)
        .map_err(|e| DecodeError::Io(std::io::Error::other(e)))?;
    println!(
        "✅ Rendered {} ({}x{}) -> {}",
        file.display(),
        image.width,
        image.height,
        output.display()
    );
    Ok(())
}

fn thumbs(folder: &PathBuf, output: Option<&std::path::Path>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut session = Session::new();
        let count = session.open_folder(folder)?;
        println!("📁 {} files in {}", count, folder.display());

        let mut rx = session.start_preview_run();
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Generated { percent, .. } => {
                    println!("⏳ Caching previews... ({percent}%)");
                }
                ProgressEvent::Failed { path, error, percent } => {
                    println!("⚠️  {} failed: {error} ({percent}%)", path.display());
                }
                ProgressEvent::Finished { generated, failed } => {
                    println!("✅ Preview caching complete: {generated} generated, {failed} failed");
                }
            }
        }

        if let Some(out_dir) = output {
            std::fs::create_dir_all(out_dir)?;
            for (path, preview) in session.previews().snapshot() {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "preview".into());
                let target = out_dir.join(format!("{stem}.png"));
                preview
                    .raster
                    .save(&target)
                    .map_err(|e| DecodeError::Io(std::io::Error::other(e)))?;
            }
            println!("💾 Previews written to {}", out_dir.display());
        }
        Ok(())
    })
}

fn ls(folder: &PathBuf) -> Result<()> {
    let mut session = Session::new();
    session.open_folder(folder)?;
    for entry in session.list_entries() {
        let name = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.path.display().to_string());
        match entry.size_mb {
            Some(mb) => println!("{name} ({mb} MB)"),
            None => println!("{name} (size unknown)"),
        }
    }
    Ok(())
}
