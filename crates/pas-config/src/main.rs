//! pas-config - Inspect and edit PAS service settings
//!
//! Commands:
//! - show <SERVICE>: Print a service's settings (secrets masked)
//! - get <SERVICE> <KEY>: Print one top-level value
//! - set <SERVICE> <KEY> [VALUE]: Store a value (prompts if no value)
//! - unset <SERVICE> <KEY>: Remove a value
//! - list: List services with stored settings
//! - age <SERVICE>: Show secret ages and rotation status
//! - migrate [SERVICE]: Move plaintext secrets into the secure backend
//! - backend: Show the selected secure backend

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pas_config::{ConfigStore, SecretAge};
use pas_core::format;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pas-config")]
#[command(about = "Secret-aware settings store for PAS tools - per-service config with secrets kept in the OS credential store")]
#[command(version)]
#[command(after_help = r#"STORAGE:
    - One JSON document per service in ~/.pas/ (override with PAS_CONFIG_DIR)
    - Secrets (tokens, passwords, credentialed URLs) live in the OS credential
      store; documents only hold a reference and its creation time
    - Without a credential store, secrets stay in the documents (logged)
    - Force a backend with PAS_SECRET_BACKEND=auto|native|plaintext

ROTATION:
    Secrets older than rotation_days (default 30) are reported stale.
    Settings: ~/.pas/pas-config.yaml"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a service's settings (secrets masked unless --reveal)
    Show {
        /// Service name (e.g., cloudflare, tg)
        service: String,
        /// Print secret values in full
        #[arg(long)]
        reveal: bool,
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Print one value
    Get {
        /// Don't print trailing newline (useful for piping)
        #[arg(short = 'n')]
        no_newline: bool,
        /// Service name
        service: String,
        /// Setting key
        key: String,
    },

    /// Store a value (prompts securely if value not provided)
    Set {
        /// Service name
        service: String,
        /// Setting key
        key: String,
        /// Value (omit for hidden prompt)
        value: Option<String>,
        /// Parse the value as JSON instead of a string
        #[arg(long)]
        json: bool,
    },

    /// Remove a value (and its secret record)
    Unset {
        /// Service name
        service: String,
        /// Setting key
        key: String,
    },

    /// List services with stored settings
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show secret ages and rotation status
    Age {
        /// Service name
        service: String,
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Move plaintext secrets into the secure backend
    Migrate {
        /// Only this service (default: all)
        service: Option<String>,
    },

    /// Show the selected secure backend
    Backend,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = ConfigStore::open()?;

    match cli.command {
        Some(Commands::Show {
            service,
            reveal,
            json,
        }) => cmd_show(&store, &service, reveal, json),
        Some(Commands::Get {
            no_newline,
            service,
            key,
        }) => cmd_get(&store, &service, &key, no_newline),
        Some(Commands::Set {
            service,
            key,
            value,
            json,
        }) => cmd_set(&store, &service, &key, value, json),
        Some(Commands::Unset { service, key }) => cmd_unset(&store, &service, &key),
        Some(Commands::List { json }) => cmd_list(&store, json),
        Some(Commands::Age { service, json }) => cmd_age(&store, &service, json),
        Some(Commands::Migrate { service }) => cmd_migrate(&store, service.as_deref()),
        Some(Commands::Backend) => cmd_backend(&store),
        None => cmd_list(&store, false),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Print a service's settings
fn cmd_show(store: &ConfigStore, service: &str, reveal: bool, json: bool) -> Result<()> {
    let loaded = store.load_with_metadata(service)?;

    let mut values = loaded.values.clone();
    if !reveal {
        for info in loaded.secrets.values() {
            if let Some(value) = info.path.lookup_mut(&mut values) {
                *value = Value::String(format::mask(&render(value)));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if values.is_empty() {
        println!("No settings stored for {}", service);
        return Ok(());
    }

    println!("{}", service);
    println!();
    for (key, value) in &values {
        let nested: Vec<_> = loaded
            .secrets
            .values()
            .filter(|info| info.path.head() == Some(key.as_str()))
            .collect();
        let marker = match loaded.secrets.get(key) {
            Some(info) if info.stale => "  (secret, stale)",
            Some(_) => "  (secret)",
            None if nested.iter().any(|info| info.stale) => "  (holds secrets, stale)",
            None if !nested.is_empty() => "  (holds secrets)",
            None => "",
        };
        println!("  {} = {}{}", key, render(value), marker);
    }

    Ok(())
}

/// Print one value
fn cmd_get(store: &ConfigStore, service: &str, key: &str, no_newline: bool) -> Result<()> {
    let values = store.load(service)?;
    let Some(value) = values.get(key) else {
        bail!("No setting '{}' for {}", key, service);
    };

    if no_newline {
        print!("{}", render(value));
    } else {
        println!("{}", render(value));
    }

    Ok(())
}

/// Store a value
fn cmd_set(
    store: &ConfigStore,
    service: &str,
    key: &str,
    value: Option<String>,
    json: bool,
) -> Result<()> {
    let raw = match value {
        Some(v) => v,
        None => {
            let input = rpassword::prompt_password(format!("Value for {}.{}: ", service, key))
                .context("Failed to read value")?;

            if input.is_empty() {
                bail!("Empty value not allowed");
            }

            input
        }
    };

    let value = if json {
        serde_json::from_str(&raw).context("Value is not valid JSON")?
    } else {
        Value::String(raw)
    };

    store.set_value(service, key, value)?;

    println!("success: Stored {}.{}", service, key);

    Ok(())
}

/// Remove a value
fn cmd_unset(store: &ConfigStore, service: &str, key: &str) -> Result<()> {
    if store.remove_value(service, key)? {
        println!("success: Removed {}.{}", service, key);
    } else {
        println!("warning: No setting '{}' for {}", key, service);
    }
    Ok(())
}

/// List services
fn cmd_list(store: &ConfigStore, json: bool) -> Result<()> {
    let services = store.list_services()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        println!("No service settings stored in {}", store.root().display());
        return Ok(());
    }

    println!("Services");
    println!();
    for service in &services {
        println!("  {}", service);
    }

    Ok(())
}

/// Show secret ages
fn cmd_age(store: &ConfigStore, service: &str, json: bool) -> Result<()> {
    let report = store.secret_report(service)?;

    if json {
        let entries: Vec<Value> = report
            .iter()
            .map(|(key, info)| {
                serde_json::json!({
                    "key": key,
                    "key_id": info.key_id.to_string(),
                    "created_at": info.created_at.map(|ts| pas_config::document::format_timestamp(&ts)),
                    "age_days": info.age.days(),
                    "stale": info.stale,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("No secrets stored for {}", service);
        return Ok(());
    }

    println!(
        "Secrets for {} (rotate after {} days)",
        service,
        store.settings().rotation_days
    );
    println!();
    for (key, info) in &report {
        let age = match info.age {
            SecretAge::Known(d) => format::age(d),
            SecretAge::Unknown => "unknown".to_string(),
        };
        let status = if info.stale { "STALE" } else { "ok" };
        println!("  {:<24} {:>10}  {}", key, age, status);
    }

    Ok(())
}

/// Migrate plaintext secrets
fn cmd_migrate(store: &ConfigStore, service: Option<&str>) -> Result<()> {
    if !store.backend().is_secure() {
        bail!("No secure backend available; secrets stay in plaintext");
    }

    let services = match service {
        Some(s) => vec![s.to_string()],
        None => store.list_services()?,
    };

    let mut total = 0;
    for service in &services {
        let migrated = store.migrate(service)?;
        for key in &migrated {
            println!("  {}.{}", service, key);
        }
        total += migrated.len();
    }

    println!("success: Migrated {} secret(s)", total);
    Ok(())
}

/// Show backend
fn cmd_backend(store: &ConfigStore) -> Result<()> {
    let backend = store.backend();
    let mode = if backend.is_secure() {
        "secure"
    } else {
        "reduced security"
    };
    println!("{} ({})", backend.name(), mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["pas-config", "show", "cloudflare"]).unwrap();
        if let Some(Commands::Show {
            service,
            reveal,
            json,
        }) = cli.command
        {
            assert_eq!(service, "cloudflare");
            assert!(!reveal);
            assert!(!json);
        } else {
            panic!("Expected Show command");
        }

        let cli = Cli::try_parse_from(["pas-config", "set", "tg", "bot_token", "123:abc"]).unwrap();
        if let Some(Commands::Set {
            service,
            key,
            value,
            json,
        }) = cli.command
        {
            assert_eq!(service, "tg");
            assert_eq!(key, "bot_token");
            assert_eq!(value, Some("123:abc".to_string()));
            assert!(!json);
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["pas-config", "get", "-n", "tg", "chat_id"]).unwrap();
        if let Some(Commands::Get {
            no_newline,
            service,
            key,
        }) = cli.command
        {
            assert!(no_newline);
            assert_eq!(service, "tg");
            assert_eq!(key, "chat_id");
        } else {
            panic!("Expected Get command");
        }
    }

    #[test]
    fn test_cli_migrate_optional_service() {
        let cli = Cli::try_parse_from(["pas-config", "migrate"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Migrate { service: None })));
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&Value::String("x".to_string())), "x");
        assert_eq!(render(&serde_json::json!(42)), "42");
    }
}
