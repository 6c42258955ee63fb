use anyhow::{Context, Result};
use clap::Parser;
use image_to_puzzle_wasm::{
    Algorithm, GenerationOptions, PixelBuffer, Pipeline, PuzzleData, generate_puzzle_bytes,
    preview_png,
};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Turn images into paint-by-number puzzles (native wrapper).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON file with generation options; flags below override it
    #[arg(long)]
    options: Option<PathBuf>,

    /// Palette size
    #[arg(short = 'k', long)]
    colors: Option<usize>,

    /// local-kmeans, local-posterize or organic-slic
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Regions smaller than this many pixels are merged away
    #[arg(long)]
    min_region: Option<usize>,

    #[arg(long)]
    max_merge_passes: Option<usize>,

    /// Merge regions whose perimeter/area ratio reaches this value
    #[arg(long)]
    max_ratio: Option<f64>,

    /// Fraction of pixels k-means trains on (0.05..=1)
    #[arg(long)]
    sample_rate: Option<f64>,

    #[arg(long)]
    iterations: Option<usize>,

    /// Majority-filter passes over the label map
    #[arg(long)]
    smoothing: Option<usize>,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Also export the tiled vector scene (zoom levels 0..=N)
    #[arg(long, value_name = "ZOOM_LEVELS")]
    scene: Option<u32>,

    /// Shrink images so neither side exceeds this size
    #[arg(short = 'm', long)]
    max_size: Option<u32>,

    /// Run on the calling thread instead of the worker, without progress
    #[arg(long)]
    sync: bool,

    /// Output directory
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Output filename prefix (ignored when --out-dir supplied)
    #[arg(short = 'p', long, default_value = "puzzle_")]
    prefix: String,
}

impl Args {
    fn generation_options(&self) -> Result<GenerationOptions> {
        let mut opts = match &self.options {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                GenerationOptions::from_json(&text).context("parsing options file")?
            }
            None => GenerationOptions::default(),
        };
        if let Some(v) = self.colors {
            opts.target_colors = v;
        }
        if let Some(v) = self.algorithm {
            opts.algorithm = v;
        }
        if let Some(v) = self.min_region {
            opts.min_region = v;
        }
        if let Some(v) = self.max_merge_passes {
            opts.max_merge_passes = v;
        }
        if self.max_ratio.is_some() {
            opts.max_perimeter_to_area_ratio = self.max_ratio;
        }
        if let Some(v) = self.sample_rate {
            opts.sample_rate = v;
        }
        if let Some(v) = self.iterations {
            opts.kmeans_iterations = v;
        }
        if let Some(v) = self.smoothing {
            opts.smoothing_passes = v;
        }
        if self.seed.is_some() {
            opts.seed = self.seed;
        }
        if let Some(zoom) = self.scene {
            opts.vector_scene = true;
            opts.max_zoom_levels = zoom;
        }
        Ok(opts.normalized())
    }

    fn output_base(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        match &self.out_dir {
            Some(dir) => dir.join(stem.as_ref()),
            None => PathBuf::from(format!("{}{}", self.prefix, stem)),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Decode and generate through the background worker, logging progress.
fn generate_on_worker(
    pipeline: &Pipeline,
    bytes: &[u8],
    options: &GenerationOptions,
    max_size: Option<u32>,
) -> Result<Option<PuzzleData>> {
    let pixels = PixelBuffer::decode(bytes, max_size).context("decoding image")?;
    pipeline
        .generate(&pixels, options, |p| info!("{:>3.0}% {}", p.fraction() * 100.0, p.label()))
        .context("puzzle generation failed")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let options = args.generation_options()?;
    let pipeline = Pipeline::new();

    for input in &args.inputs {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        info!("{}: generating with {}", input.display(), options.algorithm.label());
        let generated: Result<Option<PuzzleData>> = if args.sync {
            generate_puzzle_bytes(&bytes, &options, args.max_size).map(Some).map_err(Into::into)
        } else {
            generate_on_worker(&pipeline, &bytes, &options, args.max_size)
        };
        let Some(data) = generated.with_context(|| format!("processing {}", input.display()))?
        else {
            info!("{}: generation cancelled", input.display());
            continue;
        };
        info!(
            "{}: {}x{} prepared as {}x{}",
            input.display(),
            data.original_width,
            data.original_height,
            data.width,
            data.height
        );

        let base = args.output_base(input);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_path = with_suffix(&base, ".puzzle.json");
        fs::write(&json_path, data.to_json()?)?;
        println!("Saved → {}", json_path.display());

        let png_path = with_suffix(&base, ".preview.png");
        fs::write(&png_path, preview_png(&data).context("encoding preview")?)?;
        println!("Saved → {}", png_path.display());

        if let Some(source) = &data.source_image {
            let jpg_path = with_suffix(&base, ".source.jpg");
            fs::write(&jpg_path, &source.data)?;
            println!("Saved → {} (quality {})", jpg_path.display(), source.quality);
        }

        if let Some(scene) = &data.vector_scene {
            let meta_path = with_suffix(&base, ".scene.json");
            fs::write(&meta_path, scene.metadata_json()?)?;
            let bin_path = with_suffix(&base, ".scene.bin");
            fs::write(&bin_path, scene.binary_le_bytes())?;
            println!("Saved → {} (+ {})", meta_path.display(), bin_path.display());
        }

        info!(
            "{}: {} colours, {} regions in {:.1}ms",
            input.display(),
            data.palette.len(),
            data.regions.len(),
            data.timings.total_ms
        );
    }

    pipeline.shutdown();
    Ok(())
}
