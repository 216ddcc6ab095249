//! Command-line client for the OpenWrt ubus message bus.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use ubus::{Args, Client, Error, ObjectInfo, Transport, Value};
use ubus_proto::BlobType;

#[derive(Parser)]
#[command(name = "ubus", version, about = "Call methods on the OpenWrt ubus message bus")]
struct Cli {
    /// Path to the ubusd socket.
    #[arg(short, long, global = true, default_value = ubus::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Seconds to wait for each reply.
    #[arg(short, long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call a method on an object.
    Call {
        /// Object path (e.g., network.interface.lan).
        path: String,
        /// Method name.
        method: String,
        /// Arguments as a JSON object.
        message: Option<String>,
    },

    /// List objects, optionally matching a pattern.
    #[command(visible_alias = "ls")]
    List {
        /// Object path; a trailing `*` matches any suffix.
        pattern: Option<String>,
        /// Show object ids and method signatures.
        #[arg(short, long)]
        verbose: bool,
        /// Output format.
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

/// Output format for `list`.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    init_tracing();
    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("ubus: {e:#}");
        std::process::exit(1);
    }
}

/// Logs to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Call {
                ref path,
                ref method,
                ref message,
            } => call(&self.connect()?, path, method, message.as_deref()),
            Command::List {
                ref pattern,
                verbose,
                format,
            } => list(&self.connect()?, pattern.as_deref(), verbose, format),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "ubus", &mut std::io::stdout());
                Ok(())
            }
        }
    }

    fn connect(&self) -> Result<Client> {
        Client::builder()
            .socket(&self.socket)
            .read_timeout(Duration::from_secs(self.timeout))
            .connect()
            .with_context(|| format!("cannot connect to {}", self.socket.display()))
    }
}

fn call(client: &Client, path: &str, method: &str, message: Option<&str>) -> Result<()> {
    let args = message.map_or_else(Args::none, Args::json);
    let resp = match client.call(path, method, args) {
        Ok(resp) => resp,
        Err(Error::NoData) => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("{path} {method}")),
    };
    if !resp.is_empty() {
        println!("{}", serde_json::to_string_pretty(&resp.to_json())?);
    }
    client.close()?;
    Ok(())
}

fn list(client: &Client, pattern: Option<&str>, verbose: bool, format: OutputFormat) -> Result<()> {
    let objects = client.list(pattern)?;
    client.close()?;

    if matches!(format, OutputFormat::Json) {
        let list: Vec<_> = objects.iter().map(|o| object_json(o, verbose)).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    for o in &objects {
        if !verbose {
            println!("{}", o.path);
            continue;
        }
        println!("'{}' @{:08x}", o.path, o.id);
        for (method, args) in signatures(o) {
            println!("\t\"{method}\":{{{}}}", describe_args(args));
        }
    }
    Ok(())
}

/// The method signatures of an object, in wire order.
fn signatures(o: &ObjectInfo) -> impl Iterator<Item = (&str, &Value)> {
    let entries: &[(String, Value)] = match &o.signature {
        Some(Value::Table(entries)) => entries,
        _ => &[],
    };
    entries.iter().map(|(k, v)| (k.as_str(), v))
}

/// Renders `"name":"Type"` pairs for one method's arguments.
fn describe_args(args: &Value) -> String {
    let Value::Table(entries) = args else {
        return String::new();
    };
    entries
        .iter()
        .map(|(name, ty)| format!("\"{name}\":\"{}\"", type_name(ty)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Human name for a blobmsg type code in a signature.
fn type_name(code: &Value) -> &'static str {
    let ty = code
        .as_i64()
        .and_then(|c| u8::try_from(c).ok())
        .and_then(|c| BlobType::try_from(c).ok());
    match ty {
        Some(BlobType::Array) => "Array",
        Some(BlobType::Table) => "Table",
        Some(BlobType::String) => "String",
        Some(BlobType::Int64 | BlobType::Int32 | BlobType::Int16) => "Integer",
        Some(BlobType::Int8) => "Boolean",
        Some(BlobType::Double) => "Double",
        _ => "(unknown)",
    }
}

fn object_json(o: &ObjectInfo, verbose: bool) -> serde_json::Value {
    if !verbose {
        return serde_json::json!({ "path": o.path, "id": o.id });
    }
    let methods: serde_json::Map<String, serde_json::Value> = signatures(o)
        .map(|(method, args)| {
            let args: serde_json::Map<String, serde_json::Value> = match args {
                Value::Table(entries) => entries
                    .iter()
                    .map(|(name, ty)| (name.clone(), type_name(ty).into()))
                    .collect(),
                _ => serde_json::Map::new(),
            };
            (method.to_owned(), serde_json::Value::Object(args))
        })
        .collect();
    serde_json::json!({
        "path": o.path,
        "id": o.id,
        "type": o.type_id,
        "methods": methods,
    })
}
