use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode, WriteLogger};

use pagetile::cache::{CacheStats, ImageCache, RgbaBackend};
use pagetile::collector::{CollectorConfig, TileCollector, TileSpec};
use pagetile::settings::Settings;
use pagetile::synthetic::SyntheticDecoder;
use pagetile::tiles::{IntSize, RectF, Size, TileGridCache, VisibleTilesResolver};

#[derive(Debug, Parser)]
#[command(name = "pagetile")]
#[command(about = "Tile grids, visible-tile queries and a decode/cache simulation")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct PageArgs {
    /// Unscaled page width in pixels
    #[arg(long, default_value_t = 1240)]
    page_width: u32,
    /// Unscaled page height in pixels
    #[arg(long, default_value_t = 1754)]
    page_height: u32,
    /// Display scale applied to the page
    #[arg(long, default_value_t = 2.0)]
    scale: f32,
    #[arg(long, default_value_t = 1280.0)]
    viewport_width: f32,
    #[arg(long, default_value_t = 800.0)]
    viewport_height: f32,
}

impl PageArgs {
    fn page_size(&self) -> IntSize {
        IntSize::new(self.page_width, self.page_height)
    }

    fn viewport_size(&self) -> Size {
        Size::new(self.viewport_width, self.viewport_height)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the sub-sampling layers and tiles for one page
    Grid {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Print which fixed-size tiles a viewport touches
    Visible {
        #[command(flatten)]
        page: PageArgs,
        /// Viewport offset from the page's top-left corner
        #[arg(long, default_value_t = 0.0)]
        x: f32,
        #[arg(long, default_value_t = 0.0)]
        y: f32,
    },
    /// Decode the visible tiles of several pages and cache them
    Simulate {
        #[command(flatten)]
        page: PageArgs,
        #[arg(long, default_value_t = 4)]
        pages: usize,
        /// Vertical scroll offset within each page
        #[arg(long, default_value_t = 0.0)]
        scroll: f32,
        /// Displayed pixels per scaled pixel
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Give up waiting for tiles after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load(),
    };

    let level = match cli.verbose {
        0 => settings.level_filter(),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(cli.log_file.as_deref(), level)?;
    debug!("Effective settings: {settings:?}");

    match cli.command {
        Commands::Grid { page } => run_grid(&settings, &page),
        Commands::Visible { page, x, y } => run_visible(&settings, &page, x, y),
        Commands::Simulate {
            page,
            pages,
            scroll,
            zoom,
            workers,
            timeout_secs,
        } => run_simulate(
            &settings,
            &page,
            pages,
            scroll,
            zoom,
            workers,
            Duration::from_secs(timeout_secs),
        ),
    }
}

fn init_logging(log_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            WriteLogger::init(level, Config::default(), file)?;
        }
        None => TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )?,
    }
    Ok(())
}

fn run_grid(settings: &Settings, args: &PageArgs) -> Result<()> {
    let mut grids = TileGridCache::new(settings.tiles.tile_size);
    let grid = grids.grid(args.scale, args.viewport_size(), args.page_size());

    println!(
        "scaled image {}x{}, base sample size {}",
        grid.image_size.width, grid.image_size.height, grid.base.sample_size
    );
    for sample in grid.sample_sizes() {
        let tiles = grid.tiles_at(sample);
        println!("layer {sample}: {} tile(s)", tiles.len());
        for tile in tiles {
            let b = tile.bounds;
            println!("  [{}, {}, {}, {}]", b.left, b.top, b.right, b.bottom);
        }
    }
    Ok(())
}

fn run_visible(settings: &Settings, args: &PageArgs, x: f32, y: f32) -> Result<()> {
    let mut resolver = VisibleTilesResolver::new(settings.tiles.tile_size, args.page_size());
    let viewport = RectF::new(x, y, x + args.viewport_width, y + args.viewport_height);
    let visible = resolver.get_visible_tiles(viewport, args.scale);

    if visible.is_empty() {
        println!("no tiles visible");
        return Ok(());
    }
    println!(
        "{} tile(s), rows {}..={}, cols {}..={}, sub-sample {}",
        visible.tile_count,
        visible.row_top,
        visible.row_bottom,
        visible.col_left,
        visible.col_right,
        visible.sub_sample
    );
    for (row, col) in visible.iter() {
        println!("  ({row}, {col})");
    }
    Ok(())
}

fn run_simulate(
    settings: &Settings,
    args: &PageArgs,
    pages: usize,
    scroll: f32,
    zoom: f32,
    workers: Option<usize>,
    timeout: Duration,
) -> Result<()> {
    if pages == 0 {
        bail!("--pages must be at least 1");
    }

    let mut grids = TileGridCache::new(settings.tiles.tile_size);
    let grid = grids.grid(args.scale, args.viewport_size(), args.page_size());
    let sample = grid.sample_size_for_zoom(zoom);
    let viewport = RectF::new(0.0, scroll, args.viewport_width, scroll + args.viewport_height);

    let mut specs = HashSet::new();
    for page in 0..pages {
        specs.insert(TileSpec::from_tile(page, &grid.base));
        if sample != grid.base.sample_size {
            specs.extend(
                grid.tiles_intersecting(sample, &viewport)
                    .map(|tile| TileSpec::from_tile(page, tile)),
            );
        }
    }

    let mut config = CollectorConfig::from_settings(&settings.tiles);
    if let Some(workers) = workers {
        config = CollectorConfig::new(workers).queue_capacity(config.queue_capacity);
    }

    let cache = ImageCache::from_settings(Arc::new(RgbaBackend), &settings.cache);
    let decoder = Arc::new(SyntheticDecoder::new(pages));
    let (mut collector, output) = TileCollector::spawn(decoder, config)?;

    let started = Instant::now();
    let requested = collector.request_all(specs.iter().copied())?;
    info!("Requested {requested} tile(s) at sample size {sample}");

    let mut failed = 0usize;
    for _ in 0..requested {
        let remaining = timeout.saturating_sub(started.elapsed());
        let tile = output
            .recv_timeout(remaining)
            .context("timed out waiting for decoded tiles")?;
        match tile.image {
            Some(image) if tile.spec.sample_size == grid.base.sample_size => {
                cache.put_page(tile.spec.cache_key(), image);
            }
            Some(image) => cache.put_node(tile.spec.cache_key(), image),
            None => {
                warn!("Tile {} came back empty", tile.spec);
                failed += 1;
            }
        }
    }
    collector.shutdown_now();

    let stats = cache.stats();
    println!(
        "decoded {} tile(s) ({failed} failed) in {:.1?}",
        requested - failed,
        started.elapsed()
    );
    print_pool("node", &stats.node);
    print_pool("page", &stats.page);
    Ok(())
}

fn print_pool(name: &str, stats: &CacheStats) {
    println!(
        "{name}: {} entries, {:.1}/{:.1} MiB, {} candidate(s) {:.1} MiB, {} eviction(s)",
        stats.entries,
        mib(stats.main_bytes),
        mib(stats.max_bytes),
        stats.candidates,
        mib(stats.candidate_bytes),
        stats.evictions
    );
}

fn mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
