use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facespace_core::database::{DEFAULT_FACE_HEIGHT, DEFAULT_FACE_WIDTH};
use facespace_core::{DatabaseConfig, FaceDatabase, FaceImage, ImageError, PixelFormat, RawImage};
use image::DynamicImage;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facespace", about = "FaceSpace eigenface database CLI")]
struct Cli {
    /// Database document (default: $XDG_DATA_HOME/facespace/faces.json)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database
    Init {
        /// Face width in pixels
        #[arg(long, default_value_t = DEFAULT_FACE_WIDTH)]
        width: u32,
        /// Face height in pixels
        #[arg(long, default_value_t = DEFAULT_FACE_HEIGHT)]
        height: u32,
        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },
    /// Add face images under a label (does not rebuild)
    Train {
        /// Label for these faces (e.g., a person's name)
        #[arg(short, long)]
        label: String,
        /// Image files (grayscale or RGB)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Rebuild the eigenface model and recalibrate the threshold
    Update {
        /// Number of eigenfaces to keep (0 = one per sample)
        #[arg(short, long, default_value_t = 0)]
        components: usize,
    },
    /// Classify a face image
    Find {
        file: PathBuf,
    },
    /// Write an image as it would be stored: grayscale, at the face size
    Normalize {
        file: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// List labels and their sample counts
    List,
    /// Write a stored face to a PNG file
    Export {
        #[arg(short, long)]
        label: String,
        #[arg(short, long, default_value_t = 0)]
        index: usize,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show or set the recognition threshold
    Threshold {
        value: Option<f64>,
    },
    /// Show database summary
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(facespace_core::default_db_path);

    match cli.command {
        Commands::Init { width, height, force } => {
            if db_path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", db_path.display());
            }
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let db = FaceDatabase::new(DatabaseConfig {
                face_width: width,
                face_height: height,
            });
            db.save_to_path(&db_path)?;
            println!("Created {} ({width}x{height})", db_path.display());
        }
        Commands::Train { label, files } => {
            let db = open(&db_path)?;
            for file in &files {
                let raw = read_image(file)?;
                db.add_sample(&raw, &label)
                    .with_context(|| format!("failed to add {}", file.display()))?;
            }
            db.save_to_path(&db_path)?;
            println!(
                "Added {} image(s) for {label}; {} total. Run `facespace update` to rebuild.",
                files.len(),
                db.sample_count_for_label(&label)
            );
        }
        Commands::Update { components } => {
            let db = open(&db_path)?;
            let threshold = db.rebuild(components)?;
            db.save_to_path(&db_path)?;
            let kept = db.model().map(|m| m.components()).unwrap_or(0);
            println!(
                "Rebuilt from {} samples, {kept} components, threshold {threshold:.3}",
                db.sample_count()
            );
        }
        Commands::Find { file } => {
            let db = open(&db_path)?;
            let raw = read_image(&file)?;
            let result = db.classify_detailed(&raw)?;
            match &result.label {
                Some(label) => println!(
                    "{label} (distance {:.3}, threshold {:.3})",
                    result.distance, result.threshold
                ),
                None => println!(
                    "no match (nearest {} at distance {:.3}, threshold {:.3})",
                    result.nearest, result.distance, result.threshold
                ),
            }
        }
        Commands::Normalize { file, out } => {
            let db = open(&db_path)?;
            let face = db.normalize(&read_image(&file)?)?;
            write_face(face, &out)?;
            println!("Wrote {}", out.display());
        }
        Commands::List => {
            let db = open(&db_path)?;
            let labels = db.distinct_labels();
            if labels.is_empty() {
                println!("No faces enrolled");
            }
            for label in labels {
                println!("{label}\t{}", db.sample_count_for_label(&label));
            }
        }
        Commands::Export { label, index, out } => {
            let db = open(&db_path)?;
            let face = db.sample_image(&label, index)?;
            write_face(face, &out)?;
            println!("Wrote {}", out.display());
        }
        Commands::Threshold { value } => {
            let db = open(&db_path)?;
            if let Some(t) = value {
                db.set_threshold(t)?;
                db.save_to_path(&db_path)?;
            }
            println!("{:.3}", db.threshold());
        }
        Commands::Info => {
            let db = open(&db_path)?;
            let info = serde_json::json!({
                "path": db_path.display().to_string(),
                "database": db.summary(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn open(path: &Path) -> Result<FaceDatabase> {
    FaceDatabase::from_path(path).with_context(|| {
        format!(
            "failed to open {} (create one with `facespace init`)",
            path.display()
        )
    })
}

/// Decode an image file into the exchange format. Only 8-bit grayscale and
/// 8-bit RGB files are accepted.
fn read_image(path: &Path) -> Result<RawImage> {
    let decoded = image::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    to_raw(decoded).with_context(|| format!("cannot use {}", path.display()))
}

fn write_face(face: FaceImage, out: &Path) -> Result<()> {
    let img = image::GrayImage::from_raw(face.width, face.height, face.pixels)
        .context("face buffer does not match its size")?;
    img.save(out)
        .with_context(|| format!("failed to write {}", out.display()))
}

fn to_raw(decoded: DynamicImage) -> Result<RawImage, ImageError> {
    let (width, height) = (decoded.width(), decoded.height());
    match decoded {
        DynamicImage::ImageLuma8(buf) => RawImage::new(width, height, PixelFormat::Gray8, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => RawImage::new(width, height, PixelFormat::Rgb24, buf.into_raw()),
        other => Err(ImageError::UnsupportedFormat(format!("{:?}", other.color()))),
    }
}
