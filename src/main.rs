use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use smart_photo::candidates::MemoriesMode;
use smart_photo::config::{self, Settings};
use smart_photo::focus::DetailSaliencyDetector;
use smart_photo::geometry::NormalisedRect;
use smart_photo::imaging::{RustCodec, supported_input_extensions};
use smart_photo::manifest::{
    Edit, ManifestError, ShuffleManifest, load_manifest, save_manifest,
};
use smart_photo::output;
use smart_photo::pipeline::{Pipeline, VariantEdit, load_spec, save_spec};
use smart_photo::scorer::QualityScorer;
use smart_photo::shuffle::ShuffleEngine;
use smart_photo::source::DirAssetSource;
use smart_photo::store::{ByteStore, DirStore};
use smart_photo::types::{SizeClass, sanitise_file_name};
use std::path::{Path, PathBuf};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "smart-photo")]
#[command(about = "Subject-aware photo framing and rotating shuffle pools")]
#[command(long_about = "\
Subject-aware photo framing and rotating shuffle pools

Every prepared photo keeps a master plus three framed renders, each cropped
around the detected subject:

  small   510x510     square tile
  medium  1092x510    wide tile
  large   1092x1146   tall tile

Shuffle pools draw from a photo library directory:

  library/
  ├── Holidays/              # album \"Holidays\"
  │   ├── beach.jpg
  │   └── Screenshot 1.png   # skipped unless screenshots are allowed
  └── loose.jpg              # reachable through memories pools

All renders, specs and manifests live in the store directory. Manifest and
spec arguments are names inside the store.

Set RUST_LOG=debug for per-step detail.
Run 'smart-photo gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Photo library root
    #[arg(long, default_value = ".", global = true)]
    library: PathBuf,

    /// Directory holding renders, specs and manifests
    #[arg(long, default_value = ".smart-photo", global = true)]
    store: PathBuf,

    /// Settings file (stock defaults when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare one photo: master plus three framed renders
    Prepare {
        image: PathBuf,
        /// Spec name in the store (default: <image stem>.json)
        #[arg(long)]
        name: Option<String>,
    },
    /// Re-crop one size of a prepared photo
    Recrop(RecropArgs),
    /// Score a photo, optionally with the framing of a prepared spec
    Score {
        image: PathBuf,
        spec: Option<String>,
    },
    /// Shuffle pool commands
    #[command(subcommand)]
    Shuffle(ShuffleCommand),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Args)]
struct RecropArgs {
    /// Spec name in the store
    spec: String,
    /// small, medium or large
    #[arg(long)]
    size: SizeClass,
    /// Normalised crop as x,y,w,h (top-left origin)
    #[arg(long, value_parser = parse_rect)]
    rect: NormalisedRect,
    /// Straighten angle in degrees (clamped to ±45)
    #[arg(long, allow_hyphen_values = true)]
    straighten: Option<f64>,
    /// Clockwise quarter turns
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    turns: i32,
}

#[derive(Subcommand)]
enum ShuffleCommand {
    /// Build (or rebuild) a pool from a library album
    Album {
        album: String,
        /// Manifest name (default: album-<album>.json)
        #[arg(long)]
        manifest: Option<String>,
    },
    /// Build an on-this-day or on-this-week pool
    Memories {
        #[arg(long, default_value = "day")]
        mode: MemoriesMode,
        /// Manifest name (default: memories-<mode>.json)
        #[arg(long)]
        manifest: Option<String>,
    },
    /// Prepare the next batch of pending entries
    Prepare {
        manifest: String,
        /// Entries to prepare (default from config)
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Advance to the next prepared photo
    Next { manifest: String },
    /// Set the rotation interval (0 disables scheduled rotation)
    Rotation {
        manifest: String,
        #[arg(long)]
        minutes: i64,
    },
    /// Show pool progress and the photo currently on screen
    Status { manifest: String },
    /// Make a failed entry eligible for preparation again
    Retry { manifest: String, id: String },
}

fn parse_rect(s: &str) -> Result<NormalisedRect, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, w, h] => Ok(NormalisedRect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,w,h, got '{s}'")),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let settings = config::load_config(cli.config.as_deref())?;
    init_thread_pool(&settings.processing);
    let store = DirStore::open(&cli.store)?;
    let codec = RustCodec::new();
    let detector = DetailSaliencyDetector::default();
    let pipeline = Pipeline::new(&codec, &store, &detector, &settings);
    let now = Utc::now();

    match cli.command {
        Command::Prepare { image, name } => {
            let bytes = std::fs::read(&image)?;
            let spec = pipeline.prepare(&bytes, now)?;
            let name = name.unwrap_or_else(|| spec_name_for(&image));
            save_spec(&store, &name, &spec)?;
            output::print_spec(&spec);
            println!("Saved {name}");
        }
        Command::Recrop(args) => {
            let spec = load_spec(&store, &args.spec)?;
            let edit = VariantEdit {
                crop_rect: args.rect,
                straighten_degrees: args.straighten,
                quarter_turns: args.turns,
            };
            let replaced = pipeline.recrop(Some(&spec), args.size, &edit)?;
            save_spec(&store, &args.spec, &replaced.value)?;
            pipeline.discard(&replaced.obsolete_files)?;
            output::print_spec(&replaced.value);
        }
        Command::Score { image, spec } => {
            let bytes = std::fs::read(&image)?;
            let spec = spec.map(|name| load_spec(&store, &name)).transpose()?;
            let scorer = QualityScorer::new(&codec, &detector, &settings.scoring);
            let id = image.display().to_string();
            output::print_score(&scorer.score(&id, &bytes, spec.as_ref()));
        }
        Command::Shuffle(cmd) => {
            let source = DirAssetSource::new(&cli.library, supported_input_extensions())?;
            let engine = ShuffleEngine::new(&source, &codec, &store, &detector, &settings);
            run_shuffle(cmd, &engine, &store, &settings, now)?;
        }
        // Printed before any setup.
        Command::GenConfig => {}
    }

    Ok(())
}

fn run_shuffle(
    cmd: ShuffleCommand,
    engine: &ShuffleEngine<'_>,
    store: &dyn ByteStore,
    settings: &Settings,
    now: chrono::DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ShuffleCommand::Album { album, manifest } => {
            let name = manifest.unwrap_or_else(|| format!("album-{}.json", album.replace('/', "-")));
            let manifest = match load_existing(store, &name)? {
                Some(m) => {
                    let applied = engine.rebuild_album_manifest(m, now)?;
                    commit(engine, store, &name, &applied.manifest, &applied.obsolete_files)?;
                    applied.manifest
                }
                None => {
                    let m = engine.build_album_manifest(&album, now)?;
                    save_manifest(store, &name, &m)?;
                    m
                }
            };
            output::print_manifest(&manifest, now);
            println!("Saved {name}");
        }
        ShuffleCommand::Memories { mode, manifest } => {
            let name = manifest.unwrap_or_else(|| format!("memories-{mode}.json"));
            let fresh = engine.build_memories_manifest(mode, now)?;
            // Keep prepared entries from the previous run of the same pool.
            let manifest = match load_existing(store, &name)? {
                Some(old) if old.source_id == fresh.source_id => {
                    let ids = fresh.entries.into_iter().map(|e| e.id).collect();
                    let applied = old.apply(Edit::Rebuild { ids, now })?;
                    commit(engine, store, &name, &applied.manifest, &applied.obsolete_files)?;
                    applied.manifest
                }
                Some(old) => {
                    save_manifest(store, &name, &fresh)?;
                    let stale: Vec<String> = old.referenced_file_names().into_iter().collect();
                    engine.pipeline().discard(&stale)?;
                    fresh
                }
                None => {
                    save_manifest(store, &name, &fresh)?;
                    fresh
                }
            };
            output::print_manifest(&manifest, now);
            println!("Saved {name}");
        }
        ShuffleCommand::Prepare { manifest, batch } => {
            let m = load_manifest(store, &manifest)?;
            let batch = batch.unwrap_or(settings.shuffle.batch_size);
            let (m, outcome) = engine.prepare_next_batch(m, batch, now, None);
            if outcome.changed {
                commit(engine, store, &manifest, &m, &outcome.obsolete_files)?;
            }
            output::print_batch(&m, &outcome);
        }
        ShuffleCommand::Next { manifest } => {
            apply_and_show(engine, store, &manifest, Edit::AdvanceToNextPrepared { now }, now)?;
        }
        ShuffleCommand::Rotation { manifest, minutes } => {
            apply_and_show(engine, store, &manifest, Edit::SetRotationInterval { minutes, now }, now)?;
        }
        ShuffleCommand::Status { manifest } => {
            let m = load_manifest(store, &manifest)?;
            output::print_manifest(&m, now);
        }
        ShuffleCommand::Retry { manifest, id } => {
            apply_and_show(engine, store, &manifest, Edit::ClearFailure { id }, now)?;
        }
    }
    Ok(())
}

/// A saved manifest, or `None` when there is none yet.
fn load_existing(
    store: &dyn ByteStore,
    name: &str,
) -> Result<Option<ShuffleManifest>, ManifestError> {
    match load_manifest(store, name) {
        Ok(m) => Ok(Some(m)),
        Err(ManifestError::Store(e)) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn apply_and_show(
    engine: &ShuffleEngine<'_>,
    store: &dyn ByteStore,
    name: &str,
    edit: Edit,
    now: chrono::DateTime<Utc>,
) -> Result<(), Box<dyn std::error::Error>> {
    let applied = load_manifest(store, name)?.apply(edit)?;
    commit(engine, store, name, &applied.manifest, &applied.obsolete_files)?;
    output::print_manifest(&applied.manifest, now);
    Ok(())
}

/// Save first, then delete what the saved manifest no longer references.
fn commit(
    engine: &ShuffleEngine<'_>,
    store: &dyn ByteStore,
    name: &str,
    manifest: &ShuffleManifest,
    obsolete: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    save_manifest(store, name, manifest)?;
    engine.pipeline().discard(obsolete)?;
    Ok(())
}

/// `<image stem>.json`, sanitised for the store.
fn spec_name_for(image: &Path) -> String {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    sanitise_file_name(&format!("{stem}.json"))
}

/// Initialize the rayon thread pool based on processing config.
///
/// Never more threads than available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
