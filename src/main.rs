use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use imgforge::config::{self, ServiceConfig};
use imgforge::dispatch::Dispatcher;
use imgforge::format::Format;
use imgforge::imaging::RustBackend;
use imgforge::policy::policy_for;
use imgforge::request::{Params, UploadedImage, Uploads};
use imgforge::server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("IMGFORGE_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("IMGFORGE_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgforge")]
#[command(about = "Stateless HTTP image transformation service")]
#[command(long_about = "\
Stateless HTTP image transformation service

Every request uploads an image as multipart/form-data (field 'image') and
gets the transformed image back in the response body:

  POST /resize      width, height, fit, position
  POST /convert     format = jpeg | jpg | png | webp | avif | gif
  POST /rotate      angle, background
  POST /optimize    (re-encode with the format policy)
  POST /effects     effect = blur | sharpen | modulate | grayscale | sepia
                             | negate | tint | normalize | median
                    value, brightness, saturation, hue
  POST /composite   overlay (second file, centered)

Errors come back as JSON: {\"error\": \"...\"}

Run 'imgforge gen-config' to generate a documented config file.")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Config file (TOML); stock defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Interface to bind, overrides the config file
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, overrides the config file and $PORT
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },
    /// Run one operation against a local file
    Apply {
        /// resize | convert | rotate | optimize | effect | composite
        operation: String,
        /// Input image
        input: PathBuf,
        /// Where to write the result
        #[arg(short, long)]
        output: PathBuf,
        /// Overlay image for composite
        #[arg(long)]
        overlay: Option<PathBuf>,
        /// Operation parameter, repeatable (e.g. --param width=800)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
    /// Print the encode policy for every output format
    Formats,
    /// Print a stock config file with all options documented
    GenConfig,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut service = config::load_config(config.as_deref())
                .with_context(|| "failed to load configuration")?;
            if let Some(host) = host {
                service.server.host = host;
            }
            if let Some(port) = port {
                service.server.port = port;
            }
            service.validate()?;
            init_tracing(&service);

            info!(
                version = version_string(),
                formats = ?Format::ALL.map(Format::name),
                max_file_size = service.uploads.max_file_size,
                "starting imgforge"
            );
            let dispatcher = Arc::new(Dispatcher::new(RustBackend::new()));
            server::serve(dispatcher, &service).await?;
        }
        Command::Apply {
            operation,
            input,
            output,
            overlay,
            params,
        } => {
            init_tracing(&ServiceConfig::default());
            apply(&operation, &input, &output, overlay.as_deref(), params)?;
        }
        Command::Formats => print_formats(),
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the config filter.
fn init_tracing(config: &ServiceConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn read_upload(path: &Path) -> anyhow::Result<UploadedImage> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut upload = UploadedImage::new(data);
    if let Some(name) = path.file_name() {
        upload = upload.with_filename(name.to_string_lossy());
    }
    Ok(upload)
}

fn apply(
    operation: &str,
    input: &Path,
    output: &Path,
    overlay: Option<&Path>,
    params: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let uploads = Uploads {
        image: Some(read_upload(input)?),
        overlay: overlay.map(read_upload).transpose()?,
    };
    let params: Params = params.into_iter().collect();

    let dispatcher = Dispatcher::new(RustBackend::new());
    let result = match dispatcher.dispatch(operation, &params, &uploads) {
        Ok(result) => result,
        Err(e) => bail!("{operation} failed: {e}"),
    };

    std::fs::write(output, &result.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "{} → {} ({}, {} bytes)",
        input.display(),
        output.display(),
        result.content_type(),
        result.bytes.len()
    );
    if let Some(name) = result.filename {
        println!("suggested filename: {name}");
    }
    Ok(())
}

fn print_formats() {
    println!(
        "{:<6} {:<12} {:>7} {:>8} {:>11} {:>7} {:>7}",
        "format", "mime", "quality", "lossless", "compression", "palette", "colors"
    );
    for format in Format::ALL {
        let policy = policy_for(format);
        let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<12} {:>7} {:>8} {:>11} {:>7} {:>7}",
            format.name(),
            format.mime_type(),
            opt(policy.quality.map(|q| q.value().to_string())),
            policy.lossless,
            opt(policy.compression_level.map(|c| c.to_string())),
            policy.palette,
            opt(policy.colors.map(|c| c.to_string())),
        );
    }
}
