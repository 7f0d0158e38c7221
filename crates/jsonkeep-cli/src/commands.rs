use std::path::Path;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde_json::Value;

use jsonkeep::{Container, Key, MutableTree, Node, Observed, ObservedContainer, Store, StoreConfig};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = store_config(cli.config.as_deref(), cli.compact)?;
    match cli.command {
        Command::Get(args) => cmd_get(&open(&args.file, config)?, args.path.as_deref()),
        Command::Set(args) => cmd_set(&open(&args.file, config)?, &args.path, &args.value),
        Command::Rm(args) => cmd_rm(&open(&args.file, config)?, &args.path),
        Command::Keys(args) => cmd_keys(&open(&args.file, config)?, args.path.as_deref()),
        Command::Drop(args) => cmd_drop(&open(&args.file, config)?),
    }
}

/// The CLI always runs in direct mode and saves explicitly.
fn store_config(path: Option<&Path>, compact: bool) -> anyhow::Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    config.direct_mode = true;
    if compact {
        config.indentation = Some(0);
    }
    Ok(config)
}

fn open(file: &Path, config: StoreConfig) -> anyhow::Result<Store> {
    Store::builder(file)
        .config(config)
        .open()
        .with_context(|| format!("opening {}", file.display()))
}

fn cmd_get(store: &Store, path: Option<&str>) -> anyhow::Result<()> {
    let path = path.unwrap_or("");
    let found = lookup(store, &Key::path(path))?
        .ok_or_else(|| anyhow!("no value at `{path}`"))?;
    println!("{}", serde_json::to_string_pretty(&found.to_value()?)?);
    Ok(())
}

fn cmd_set(store: &Store, path: &str, value: &str) -> anyhow::Result<()> {
    let previous = assign(store, &Key::path(path), parse_value(value))?;
    store.save(true)?;
    let verb = if previous.is_some() { "Updated" } else { "Set" };
    println!("{} {} {}", "✓".green().bold(), verb, path.yellow());
    Ok(())
}

fn cmd_rm(store: &Store, path: &str) -> anyhow::Result<()> {
    remove(store, &Key::path(path))?;
    store.save(true)?;
    println!("{} Removed {}", "✓".green().bold(), path.yellow());
    Ok(())
}

fn cmd_keys(store: &Store, path: Option<&str>) -> anyhow::Result<()> {
    let path = path.unwrap_or("");
    let container = match lookup(store, &Key::path(path))? {
        Some(Observed::Tree(container)) => container,
        Some(Observed::Value(_)) => bail!("`{path}` is not an object or array"),
        None => bail!("no value at `{path}`"),
    };
    let keys = container.keys()?;
    if keys.is_empty() {
        println!("{}", "(empty)".dimmed());
    }
    for key in keys {
        println!("{}", key.to_string().bold());
    }
    Ok(())
}

fn cmd_drop(store: &Store) -> anyhow::Result<()> {
    store.delete()?;
    println!("{} Deleted {}", "✓".green().bold(), store.path().display());
    Ok(())
}

/// Arguments that are not valid JSON are taken as bare strings.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn join(keys: &[Key]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Follow `keys` from the root. `Ok(None)` if any segment is missing.
fn lookup(store: &Store, keys: &[Key]) -> anyhow::Result<Option<Observed>> {
    let mut current = Observed::Tree(store.data());
    for key in keys {
        let Observed::Tree(container) = current else {
            return Ok(None);
        };
        match container.get(key)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Walk to the container that holds the last key. With `create`, missing
/// parents are added: an array when the next segment is a position, an
/// object otherwise.
fn parent_of(
    store: &Store,
    keys: &[Key],
    create: bool,
) -> anyhow::Result<Option<ObservedContainer>> {
    let Some((_, parents)) = keys.split_last() else {
        bail!("path must not be empty");
    };
    let mut current = store.data();
    for (depth, key) in parents.iter().enumerate() {
        current = match current.get(key)? {
            Some(Observed::Tree(child)) => child,
            Some(Observed::Value(_)) => {
                bail!("`{}` is not an object or array", join(&keys[..=depth]))
            }
            None if create => {
                let fresh = match &keys[depth + 1] {
                    Key::Index(_) => Container::array(),
                    Key::Name(_) => Container::object(),
                };
                current.set(key, fresh.clone())?;
                current.observer().wrap(fresh)
            }
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn assign(store: &Store, keys: &[Key], value: Value) -> anyhow::Result<Option<Node>> {
    let parent = parent_of(store, keys, true)?
        .ok_or_else(|| anyhow!("cannot create `{}`", join(keys)))?;
    let last = keys.last().ok_or_else(|| anyhow!("path must not be empty"))?;
    Ok(parent.set(last, value)?)
}

fn remove(store: &Store, keys: &[Key]) -> anyhow::Result<Node> {
    let missing = || anyhow!("no value at `{}`", join(keys));
    let parent = parent_of(store, keys, false)?.ok_or_else(missing)?;
    let last = keys.last().ok_or_else(missing)?;
    parent.delete(last)?.ok_or_else(missing)
}
