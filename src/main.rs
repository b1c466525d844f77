use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use space_scene::export::{self, ExportFormat};
use space_scene::rng::generate_seed;
use space_scene::{scene, Executor, RenderConfig, RenderRequest, StarfieldRenderer, Surface};

#[derive(Parser)]
#[command(name = "space-scene", version, about = "Render seeded 2D space scenes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a scene and save it as an image
    Render {
        /// Scene seed; a random one is generated when omitted
        #[arg(long)]
        seed: Option<String>,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 768)]
        height: u32,
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Render in the calling thread instead of a background worker
        #[arg(long)]
        in_process: bool,
        /// Output path without extension (defaults to the seed)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Export formats to try, in order (png, ppm)
        #[arg(long, value_delimiter = ',')]
        format: Vec<String>,
    },
    /// Print the scene description for a seed as JSON
    Scene {
        #[arg(long)]
        seed: String,
        #[arg(long, default_value_t = 1024)]
        width: u32,
        #[arg(long, default_value_t = 768)]
        height: u32,
    },
    /// Print a freshly generated seed
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            seed,
            width,
            height,
            config,
            in_process,
            out,
            format,
        } => {
            let mut config = match config {
                Some(path) => RenderConfig::from_json_file(&path)?,
                None => RenderConfig::default(),
            };
            if in_process {
                config.offload = false;
            }
            if !format.is_empty() {
                config.export_formats = format
                    .iter()
                    .map(|f| ExportFormat::parse(f))
                    .collect::<Result<_, _>>()?;
            }

            let seed = seed.unwrap_or_else(generate_seed);
            let request = RenderRequest::new(seed.clone(), width, height);
            request.validate()?;

            let surface = Surface::new(width, height)?;
            let executor = Executor::probe(surface, Arc::new(StarfieldRenderer::new()), &config).await;
            log::info!("rendering {} at {}x{} ({:?})", seed, width, height, executor.kind());

            let outcome = executor
                .render(&request)
                .await
                .with_context(|| format!("rendering seed {:?}", seed))?;
            let image = executor.snapshot().await?;
            executor.close().await;

            let stem = out.unwrap_or_else(|| PathBuf::from(&seed));
            let path = export::save_surface(&image, &stem, &config.export_formats)?;
            println!("seed:   {}", seed);
            println!("tiles:  {}", outcome.tiles());
            println!("digest: {}", image.digest());
            println!("saved:  {}", path.display());
        }
        Commands::Scene {
            seed,
            width,
            height,
        } => {
            let scene = scene::generate(&seed, width, height)?;
            println!("{}", serde_json::to_string_pretty(&scene)?);
        }
        Commands::Seed => println!("{}", generate_seed()),
    }
    Ok(())
}
