use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use avatarlib::presence::{
    HttpPresenceSource, PresenceSource, StoreListingSource,
};
use avatarlib::setup::{ensure_bucket, BucketSetup};
use avatarlib::store::{BucketOptions, ObjectStore, SupabaseStorage};
use avatarlib::{
    AvatarCache, AvatarConfig, AvatarService, EntityId, ImageBlob, Outcome,
};
use clap::{Parser, Subcommand};
use image::ImageFormat;

#[derive(Parser, Debug)]
#[command(name = "avatars")]
#[command(about = "Manage personality avatars in Supabase Storage", long_about = None)]
struct Cli {
    /// Derive avatar presence from the bucket instead of asking the backend
    #[arg(long, global = true)]
    from_storage: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the public avatar URL of each entity, or `none`
    Resolve { ids: Vec<String> },

    /// Normalize an image and store it as the entity's avatar
    Upload { id: String, file: PathBuf },

    /// Delete the entity's avatar
    Remove { id: String },

    /// Print the avatar flag of every known entity
    List,

    /// Create the avatar bucket if it does not exist yet
    Setup,
}

fn mime_type(path: &Path) -> &'static str {
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::Ico) => "image/x-icon",
        Ok(ImageFormat::Avif) => "image/avif",
        _ => "application/octet-stream",
    }
}

fn print_outcome(outcome: Outcome) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(())
}

async fn setup(store: &dyn ObjectStore, bucket: &str) -> anyhow::Result<()> {
    let options = BucketOptions::avatars(bucket);
    match ensure_bucket(store, &options).await? {
        BucketSetup::AlreadyExists => {
            println!("bucket {} already exists", bucket)
        }
        BucketSetup::Created => println!("bucket {} created", bucket),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    avatarlib::initialize();
    let cli = Cli::parse();

    let config =
        AvatarConfig::from_env().context("could not load configuration")?;
    let store: Arc<dyn ObjectStore> = Arc::new(SupabaseStorage::new(
        config.supabase_url.clone(),
        &config.api_key,
        config.bucket.clone(),
    )?);

    let source: Arc<dyn PresenceSource> = if cli.from_storage {
        Arc::new(
            StoreListingSource::new(store.clone())
                .with_probe_concurrency(config.probe_concurrency),
        )
    } else {
        Arc::new(HttpPresenceSource::new(&config.backend_url)?)
    };
    let cache = Arc::new(AvatarCache::new(config.bucket.clone(), source));
    let service = AvatarService::new(
        store.clone(),
        cache.clone(),
        config.public_base_url()?,
    )?
    .with_max_dimension(config.max_dimension)
    .with_max_upload_bytes(config.max_upload_bytes);

    match cli.command {
        Command::Resolve { ids } => {
            for raw in ids {
                let id: EntityId = raw.parse()?;
                match service.resolve(&id).await {
                    Some(url) => println!("{}\t{}", id, url),
                    None => println!("{}\tnone", id),
                }
            }
        }
        Command::Upload { id, file } => {
            let id: EntityId = id.parse()?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("could not read {}", file.display()))?;
            let blob = ImageBlob::new(bytes, mime_type(&file));
            print_outcome(service.upload(&id, blob).await.into())?;
        }
        Command::Remove { id } => {
            let id: EntityId = id.parse()?;
            print_outcome(service.remove(&id).await.into())?;
        }
        Command::List => {
            cache.ensure_ready().await;
            println!("{}", serde_json::to_string_pretty(&cache.snapshot())?);
        }
        Command::Setup => setup(store.as_ref(), &config.bucket).await?,
    }

    Ok(())
}
