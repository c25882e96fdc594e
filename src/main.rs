//! comic-opds server entry point.

use clap::Parser;
use comic_opds::{
    auth,
    config::{Cli, Command, Config, UserCommand},
    db::Database,
    server::{self, ControlClient, Server},
};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comic_opds=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Scan) => cmd_scan(&config).await,
        Some(Command::Dump) => cmd_dump(&config).await,
        Some(Command::User { action }) => cmd_user(action, &config).await,
        Some(Command::Serve { bind, library }) => cmd_serve(config, bind, library).await,
        None => cmd_serve(config, None, None).await,
    }
}

/// Write a default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());
    println!("\nEdit config.toml to point [library] root at your comics.");
    println!("Then run: comic-opds serve");

    Ok(())
}

/// Ask the running server for an immediate rescan.
async fn cmd_scan(config: &Config) -> anyhow::Result<()> {
    let client = ControlClient::new(config.control_url());
    let stats = client.scan().await?;

    println!(
        "Catalog synchronized: {} series, {} entries ({} replaced, {} series and {} entries removed)",
        stats.series, stats.entries, stats.replaced, stats.removed_series, stats.removed_entries
    );

    Ok(())
}

/// Print the running server's catalog tables.
async fn cmd_dump(config: &Config) -> anyhow::Result<()> {
    let client = ControlClient::new(config.control_url());
    print!("{}", client.dump().await?);
    Ok(())
}

/// User management through the control channel.
async fn cmd_user(action: UserCommand, config: &Config) -> anyhow::Result<()> {
    let client = ControlClient::new(config.control_url());

    match action {
        UserCommand::Add { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("Password: ")?,
            };

            client.add_user(&username, &password).await?;
            println!("Created user: {}", username);
        }

        UserCommand::Del { username } => {
            client.delete_user(&username).await?;
            println!("Deleted user: {}", username);
        }

        UserCommand::Rename { username, new_name } => {
            client.change_username(&username, &new_name).await?;
            println!("Renamed user: {} -> {}", username, new_name);
        }

        UserCommand::Passwd { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_password("New password: ")?,
            };

            client.change_password(&username, &password).await?;
            println!("Password changed for: {}", username);
        }
    }

    Ok(())
}

/// Start the server and run until Ctrl-C.
async fn cmd_serve(
    mut config: Config,
    bind: Option<SocketAddr>,
    library: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }
    if let Some(root) = library {
        config.library.root = root;
    }
    config.validate()?;

    let db = Database::open(&config.database.path)?;

    if db.user_count()? == 0 {
        let password = auth::generate_password();
        db.add_user("admin", &password)?;
        tracing::warn!(
            user = "admin",
            password = %password,
            "Created initial user, change this password"
        );
    }

    tracing::info!(
        bind = %config.server.bind,
        control = %config.server.control_bind,
        library = %config.library.root.display(),
        database = %config.database.path.display(),
        "Starting comic-opds server"
    );

    let state = server::AppState::new(config, db);
    let server = Server::new(state);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    server.stop().await?;

    Ok(())
}

/// Prompt for password input.
fn prompt_password(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut password = String::new();
    io::stdin().read_line(&mut password)?;

    Ok(password.trim().to_string())
}
