use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_engine::{default_engine, read_page_overlays, OpenSource, PdfEngine, RenderRequest};
use redline_core::{
    bake_pdf, Affordance, AnnotationPayload, EngineConfig, LabelFont, OverlaySize, OverlaySurface,
    Painter,
};
use redline_scheduler::CancellationToken;
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "redline-cli")]
#[command(about = "Bake review annotations into PDFs")]
pub struct Cli {
    /// Engine configuration file (TOML); REDLINE_* variables override it.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Bake an annotation payload into a copy of a PDF.
    Bake {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        annotations: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Overlay pixels per PDF point.
        #[arg(long)]
        raster_scale: Option<f32>,
    },
    /// List pages carrying baked overlays.
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render one page's annotations over a blank page as PNG.
    Preview {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        annotations: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    page: u32,
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OverlayOutput {
    page: u32,
    width: u32,
    height: u32,
    ink_bounds: Option<InkBounds>,
}

#[derive(Debug, Serialize)]
struct InkBounds {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the `warn` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Bake { file, annotations, output, raster_scale } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(scale) = raster_scale {
                config = config.with_raster_scale(scale);
                config.validate().context("invalid --raster-scale")?;
            }
            run_bake(&file, &annotations, output.as_deref(), &config)
        }
        Commands::Inspect { file } => run_inspect(&file),
        Commands::Preview { file, annotations, page, zoom, output } => {
            run_preview(&file, &annotations, page, zoom, &output)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env().context("invalid REDLINE_* environment")
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let mut pages = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        let size = engine.page_size(handle, index)?;
        pages.push(PageOutput { page: index + 1, width: size.width_pt, height: size.height_pt });
    }

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    engine.close(handle)?;

    Ok(())
}

fn run_bake(file: &Path, annotations: &Path, output: Option<&Path>, config: &EngineConfig) -> Result<()> {
    ensure_file_exists(file)?;
    let source = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let payload = read_payload(annotations)?;

    let mut painter = Painter::new(LabelFont::bundled().context("failed to load label font")?);
    let outcome = bake_pdf(
        &source,
        &payload.annotations,
        &mut painter,
        &config.bake,
        &CancellationToken::new(),
    )
    .context("failed to bake PDF")?;

    for skipped in &outcome.skipped {
        eprintln!("skipped {} on page {}: {}", skipped.id, skipped.page, skipped.reason);
    }

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_output(file, "baked", "pdf"));
    write_output(&output, &outcome.bytes)?;
    tracing::info!(pages = ?outcome.baked_pages, output = %output.display(), "bake written");
    println!("{}", output.display());

    Ok(())
}

fn run_inspect(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let overlays = read_page_overlays(&bytes).context("failed to open PDF")?;

    let pages: Vec<OverlayOutput> = overlays
        .iter()
        .map(|overlay| OverlayOutput {
            page: overlay.page_number,
            width: overlay.image.width(),
            height: overlay.image.height(),
            ink_bounds: ink_bounds(&overlay.image),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&pages)?);

    Ok(())
}

fn run_preview(file: &Path, annotations: &Path, page: u32, zoom: f32, output: &Path) -> Result<()> {
    ensure_file_exists(file)?;
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    if !zoom.is_finite() || zoom <= 0.0 {
        anyhow::bail!("--zoom must be a positive number");
    }
    let payload = read_payload(annotations)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;
    let page_size = engine.page_size(handle, page - 1).context("page out of range")?;
    let mut sheet = engine
        .render_page(handle, RenderRequest { page_index: page - 1, scale: zoom })
        .context("failed to render page")?;
    engine.close(handle)?;

    let size = OverlaySize::new(sheet.width(), sheet.height());
    let mut surface = OverlaySurface::new(size, page_size).context("invalid overlay size")?;
    let mut painter = Painter::new(LabelFont::bundled().context("failed to load label font")?);
    let report = painter.replay(
        &mut surface,
        payload.annotations.iter().filter(|a| a.page() == page),
        &Affordance::none(),
    );
    for skipped in &report.skipped {
        eprintln!("skipped: {skipped}");
    }

    image::imageops::overlay(&mut sheet, &surface.to_rgba_image(), 0, 0);
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    sheet.save(output).with_context(|| format!("failed to write image to {}", output.display()))?;
    println!("{}", output.display());

    Ok(())
}

fn read_payload(path: &Path) -> Result<AnnotationPayload> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    AnnotationPayload::from_json(&bytes)
        .with_context(|| format!("invalid annotation payload {}", path.display()))
}

fn ink_bounds(image: &pdf_engine::RgbaImage) -> Option<InkBounds> {
    image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel.0[3] > 0)
        .fold(None, |bounds, (x, y, _)| {
            Some(match bounds {
                None => InkBounds { x0: x, y0: y, x1: x, y1: y },
                Some(b) => InkBounds { x0: b.x0.min(x), y0: b.y0.min(y), x1: b.x1.max(x), y1: b.y1.max(y) },
            })
        })
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_output(file: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");

    file.with_file_name(format!("{stem}-{suffix}.{extension}"))
}
