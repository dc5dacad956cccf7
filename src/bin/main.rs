use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http::Method;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

use syn_auth::auth::{AuthRequest, RequestOrigin, authenticate};
use syn_auth::config::{Settings, resolve_settings_path, settings_dir};
use syn_auth::keys::KeyLoader;
use syn_auth::registry::SiteRegistry;
use syn_auth::server::{ServeOptions, serve};

#[derive(Parser)]
#[command(name = "syn-auth")]
#[command(about = "Bearer token authentication for multi-site content platforms")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/syn/syn-settings.yml, then ./syn-settings.yml)
    #[arg(long, global = true, env = "SYN_SETTINGS")]
    settings: Option<PathBuf>,
    /// Directory relative key paths resolve against (default: the settings file's directory)
    #[arg(long, global = true, env = "SYN_KEY_ROOT")]
    key_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authentication server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080", env = "SYN_BIND")]
        bind: String,
        /// Take scheme, host and method from X-Forwarded-* headers (only behind a trusted proxy)
        #[arg(long, default_value_t = false)]
        trust_forwarded_headers: bool,
    },
    /// Load the settings and list the sites that were accepted
    Check,
    /// Authenticate one request description and print the result
    Verify {
        /// Full Authorization header value, e.g. "Bearer eyJ..."
        #[arg(long)]
        authorization: Option<String>,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request origin, e.g. http://a.com
        #[arg(long)]
        origin: Option<String>,
    },
}

fn key_loader(settings_path: &Path, key_root: Option<PathBuf>) -> KeyLoader {
    KeyLoader::new(key_root.unwrap_or_else(|| settings_dir(settings_path)))
}

fn check(settings_path: &Path, loader: &KeyLoader) -> Result<ExitCode> {
    let settings = Settings::load(settings_path)?;
    let registry = SiteRegistry::build(&settings, loader);
    let sites = registry.sites();

    println!("settings: {}", settings_path.display());
    println!("key root: {}", loader.key_root().display());
    if registry.is_disabled() {
        println!("authentication: DISABLED");
    }
    println!(
        "sites: {} accepted, {} skipped",
        sites.len(),
        settings.sites.len().saturating_sub(sites.len())
    );
    for (key, algorithm, anonymous) in sites {
        println!("  {:<40} {:<6} anonymous={}", key.to_string(), algorithm.name(), anonymous);
    }
    println!("static tokens: {}", registry.static_token_count());

    Ok(ExitCode::SUCCESS)
}

fn verify(
    settings_path: &Path,
    loader: &KeyLoader,
    authorization: Option<&str>,
    method: &str,
    origin: Option<&str>,
) -> Result<ExitCode> {
    let registry = SiteRegistry::load(settings_path, loader)?;
    let method = Method::from_bytes(method.as_bytes()).context("invalid HTTP method")?;
    let origin = origin
        .map(|o| RequestOrigin::parse(o).with_context(|| format!("invalid origin '{}'", o)))
        .transpose()?;

    let result = authenticate(
        &registry,
        &AuthRequest {
            authorization,
            method: &method,
            origin: origin.as_ref(),
        },
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(match result.identity() {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn"))
                .add_directive("syn_auth=info".parse()?),
        )
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = resolve_settings_path(cli.settings.as_deref())?;
    let loader = key_loader(&settings_path, cli.key_root);

    match cli.command {
        Commands::Serve {
            bind,
            trust_forwarded_headers,
        } => {
            info!(
                settings = %settings_path.display(),
                key_root = %loader.key_root().display(),
                "Starting syn-auth"
            );
            serve(ServeOptions {
                bind,
                settings_path,
                key_loader: loader,
                trust_forwarded_headers,
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => check(&settings_path, &loader),
        Commands::Verify {
            authorization,
            method,
            origin,
        } => verify(
            &settings_path,
            &loader,
            authorization.as_deref(),
            &method,
            origin.as_deref(),
        ),
    }
}
