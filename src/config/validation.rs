use anyhow::Result;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use super::AppConfig;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "serverless-api", version, about = "Instrumented movie-table API")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, env = "APP_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Server port
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Environment name
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Storage table name
    #[arg(long)]
    pub table_name: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Variables set by the function runtime and the original deployment, mapped onto
/// their configuration keys
const LEGACY_ENV: [(&str, &str); 5] = [
    ("TABLE_NAME", "storage.table_name"),
    ("POWERTOOLS_SERVICE_NAME", "service.name"),
    ("POWERTOOLS_METRICS_NAMESPACE", "metrics.namespace"),
    ("POWERTOOLS_LOG_LEVEL", "logging.level"),
    ("AWS_LAMBDA_FUNCTION_NAME", "service.function_name"),
];

fn legacy_env() -> Env {
    Env::raw()
        .only(&LEGACY_ENV.map(|(var, _)| var))
        .map(|var| {
            LEGACY_ENV
                .iter()
                .find(|(name, _)| var.as_str().eq_ignore_ascii_case(name))
                .map(|(_, key)| key.to_string())
                .unwrap_or_else(|| var.as_str().to_string())
                .into()
        })
}

/// Build the layered configuration without validating it
///
/// Precedence (lowest first): embedded defaults, `config/default.toml`,
/// `config/<environment>.toml`, an explicit `--config` file, `APP_`-prefixed variables,
/// runtime variables such as `TABLE_NAME`, then CLI flags.
///
/// The `config/` files are profile-keyed (`[default.server]`); the `--config` file is not.
pub fn figment(cli: &Cli) -> Figment {
    let env_name = cli.environment.clone().unwrap_or_else(|| {
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string())
    });

    let mut figment = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/default.toml").nested())
        .merge(Toml::file(format!("config/{}.toml", env_name)).nested());

    if let Some(path) = &cli.config {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment
        .merge(Env::prefixed("APP_").split("__"))
        .merge(legacy_env());

    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(table_name) = &cli.table_name {
        figment = figment.merge(Serialized::default("storage.table_name", table_name));
    }
    if cli.debug {
        figment = figment.merge(Serialized::default("logging.level", "DEBUG"));
    }

    figment
}

/// Load and validate configuration
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config: AppConfig = figment(cli).extract()?;

    config.validate()?;

    Ok(config)
}
