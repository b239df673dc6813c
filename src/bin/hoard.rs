use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use hoard::config::Config;
use hoard::db::Database;
use hoard::download::{DownloadEvent, DownloadManager, DownloadProvider, HttpDownloadProvider};
use hoard::families::{SkinFamily, SkinInfo};
use hoard::file_store::FileStoreManager;
use hoard::import::{
    CancellationToken, ImportManager, ImportProgressHandle, ImportScheduler, ModelFamily,
};
use hoard::library::LibraryManager;
use hoard::Importable;

enum Command {
    Import(Vec<PathBuf>),
    List,
    Delete(i64),
    Restore(i64),
    Purge,
    Export(i64),
    ImportLegacy(Option<PathBuf>),
    Download(String),
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Some(command) => command,
        None => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    let config = Config::load();
    let importer = match open_library(&config).await {
        Ok(importer) => importer,
        Err(e) => {
            error!("Failed to open library at {}: {}", config.library_path.display(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(command, &config, importer).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Option<Command> {
    let command = args.get(1)?;
    let rest = &args[2..];
    let id = || rest.first().and_then(|s| s.parse::<i64>().ok());

    match command.as_str() {
        "import" if !rest.is_empty() => Some(Command::Import(rest.iter().map(PathBuf::from).collect())),
        "list" => Some(Command::List),
        "delete" => id().map(Command::Delete),
        "restore" => id().map(Command::Restore),
        "purge" => Some(Command::Purge),
        "export" => id().map(Command::Export),
        "import-legacy" => Some(Command::ImportLegacy(rest.first().map(PathBuf::from))),
        "download" if !rest.is_empty() => Some(Command::Download(rest.join(" "))),
        _ => {
            error!("Unknown or incomplete command: {}", args[1..].join(" "));
            None
        }
    }
}

async fn open_library(config: &Config) -> Result<ImportManager<SkinFamily>, Box<dyn std::error::Error>> {
    tokio::fs::create_dir_all(&config.library_path).await?;

    let database = Database::new(&config.database_path().to_string_lossy()).await?;
    let files = FileStoreManager::new(&config.files_path()).await?;
    let runtime_handle = tokio::runtime::Handle::current();

    let family = SkinFamily;
    let library = LibraryManager::new(database, files, family.name());
    let scheduler = Arc::new(ImportScheduler::new(
        family.name(),
        config.import_concurrency,
        runtime_handle.clone(),
    ));
    let progress = ImportProgressHandle::new(&runtime_handle);

    Ok(ImportManager::new(family, library, scheduler, progress, config.exports_path()).await?)
}

async fn run(
    command: Command,
    config: &Config,
    importer: ImportManager<SkinFamily>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Import(paths) => {
            let imported = if paths.len() == 1 {
                importer
                    .import_path(&paths[0], CancellationToken::new())
                    .await?
                    .into_iter()
                    .collect()
            } else {
                importer.import_paths(&paths).await
            };
            for skin in &imported {
                print_skin(skin);
            }
            info!("Imported {} of {} source(s)", imported.len(), paths.len());
        }
        Command::List => {
            for skin in importer.library().all().await? {
                print_skin(&skin);
            }
        }
        Command::Delete(id) => {
            let skin = find(&importer, id).await?;
            if importer.library().delete(&skin).await? {
                info!("Deleted {}", skin.display_name());
            } else {
                info!("{} was already deleted", skin.display_name());
            }
        }
        Command::Restore(id) => {
            let skin = find(&importer, id).await?;
            if importer.library().undelete(&skin).await? {
                info!("Restored {}", skin.display_name());
            } else {
                info!("{} was not deleted", skin.display_name());
            }
        }
        Command::Purge => {
            let purged = importer.library().cleanup().await?;
            info!("Purged {} skin(s)", purged);
        }
        Command::Export(id) => {
            let skin = find(&importer, id).await?;
            let path = importer.export(&skin).await?;
            println!("{}", path.display());
        }
        Command::ImportLegacy(root) => {
            let Some(root) = root.or_else(|| config.legacy_path.clone()) else {
                return Err("No legacy installation given and HOARD_LEGACY_PATH is not set".into());
            };
            let imported = importer.import_from_legacy(&root).await;
            for skin in &imported {
                print_skin(skin);
            }
        }
        Command::Download(name) => {
            let provider: Option<Arc<dyn DownloadProvider<SkinInfo>>> = config
                .download_url
                .as_deref()
                .map(|url| {
                    Arc::new(HttpDownloadProvider::new(url, &config.downloads_path()))
                        as Arc<dyn DownloadProvider<SkinInfo>>
                });
            let downloads =
                DownloadManager::new(importer, provider, tokio::runtime::Handle::current());
            let mut events = downloads.subscribe();

            if !downloads.download(&SkinInfo::new(&name, "")) {
                return Err(format!("Could not start download of {}", name).into());
            }
            while let Some(event) = events.recv().await {
                match event {
                    DownloadEvent::Began(_) => {}
                    DownloadEvent::Completed(skin) => {
                        print_skin(&skin);
                        break;
                    }
                    DownloadEvent::Failed(_) => {
                        return Err(format!("Download of {} failed", name).into());
                    }
                }
            }
        }
    }
    Ok(())
}

async fn find(
    importer: &ImportManager<SkinFamily>,
    id: i64,
) -> Result<SkinInfo, Box<dyn std::error::Error>> {
    importer
        .library()
        .get(id)
        .await?
        .ok_or_else(|| format!("No skin with ID {}", id).into())
}

fn print_skin(skin: &SkinInfo) {
    println!(
        "{}\t{}\t{}{}",
        skin.id().unwrap_or_default(),
        skin.hash().unwrap_or("-"),
        skin.display_name(),
        if skin.delete_pending() { "\t(deleted)" } else { "" }
    );
}

fn print_usage(program_name: &str) {
    eprintln!("Usage:");
    eprintln!("  {} import <path>...", program_name);
    eprintln!("  {} list", program_name);
    eprintln!("  {} delete <id>", program_name);
    eprintln!("  {} restore <id>", program_name);
    eprintln!("  {} purge", program_name);
    eprintln!("  {} export <id>", program_name);
    eprintln!("  {} import-legacy [installation_root]", program_name);
    eprintln!("  {} download <name>", program_name);
}
