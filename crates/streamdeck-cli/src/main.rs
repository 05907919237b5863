//! Stream Deck Control Tool
//!
//! CLI for drawing on and reading keys from a 15-key Stream Deck.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamdeck_hw::icon::parse_hex_color;
use streamdeck_hw::page::DEFAULT_CACHE_CAPACITY;
use streamdeck_hw::{list_devices, HidApi, ListenerOptions, PixelFormat, StreamDeck};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{ButtonConfig, Config, Face};

/// How long one poll waits before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "streamdeckctl")]
#[command(about = "Control tool for the 15-key Stream Deck")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// HID device path (default: first Stream Deck found)
    #[arg(long)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected Stream Decks
    List,
    /// Clear all keys and show the logo
    Reset,
    /// Set backlight brightness
    Brightness {
        /// Brightness (0-100)
        level: u8,
    },
    /// Fill a key with a solid color
    Color {
        /// Key number (1-15)
        button: u8,
        /// Color in hex format (e.g., #FF0000 for red)
        color: String,
    },
    /// Draw an image file on a key
    Image {
        /// Key number (1-15)
        button: u8,
        /// Path to an image file
        path: PathBuf,
    },
    /// Fill a key with raw 72x72 RGB or RGBA bytes read from a file
    Raw {
        /// Key number (1-15)
        button: u8,
        /// Path to the raw pixel file
        path: PathBuf,
        /// Pixels are RGB (3 bytes) instead of RGBA (4 bytes)
        #[arg(long)]
        rgb: bool,
    },
    /// Print key events until interrupted
    Watch,
    /// Apply a key layout and react to presses until interrupted
    Run {
        /// Configuration file
        #[arg(short, long, default_value = "config/default.toml")]
        config: PathBuf,
    },
    /// Write a default configuration file
    Init {
        /// Output file path
        #[arg(default_value = "config/default.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::List => handle_list(),
        Commands::Init { output } => handle_init(&output),
        Commands::Run { config } => {
            let config = Config::load(&config)
                .with_context(|| format!("Failed to load {}", config.display()))?;
            let device = cli
                .device
                .or_else(|| (!config.auto_detect()).then(|| config.device.clone()));
            let deck = Arc::new(open_deck(device.as_deref(), config.cache_capacity)?);
            handle_run(deck, config).await
        }
        Commands::Watch => {
            let deck = Arc::new(open_deck(cli.device.as_deref(), DEFAULT_CACHE_CAPACITY)?);
            handle_watch(deck).await
        }
        command => {
            let deck = open_deck(cli.device.as_deref(), DEFAULT_CACHE_CAPACITY)?;
            handle_device(command, &deck)
        }
    }
}

fn open_deck(path: Option<&str>, cache_capacity: usize) -> Result<StreamDeck> {
    let deck = match path {
        Some(path) => {
            let api = HidApi::new().context("Failed to initialize HID")?;
            StreamDeck::open_path(&api, path)
        }
        None => StreamDeck::open(),
    }
    .context("Failed to open Stream Deck. Is it connected?")?;

    deck.set_cache_capacity(cache_capacity);
    Ok(deck)
}

fn handle_list() -> Result<()> {
    let api = HidApi::new().context("Failed to initialize HID")?;
    let decks = list_devices(&api);
    if decks.is_empty() {
        println!("No Stream Decks found");
        return Ok(());
    }

    println!("Stream Decks:");
    for deck in decks {
        println!("  {}", deck.path);
        if let Some(product) = deck.product {
            println!("      Product: {}", product);
        }
        if let Some(serial) = deck.serial_number {
            println!("      Serial: {}", serial);
        }
    }
    Ok(())
}

fn handle_init(output: &Path) -> Result<()> {
    let mut config = Config::default();
    config.buttons.push(ButtonConfig {
        button: 1,
        image: None,
        color: Some("#FF0000".to_string()),
        pressed_image: None,
        pressed_color: Some("#FFFFFF".to_string()),
    });

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    config.save(output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}

fn handle_device(command: Commands, deck: &StreamDeck) -> Result<()> {
    match command {
        Commands::Reset => {
            deck.reset()?;
            println!("Stream Deck reset");
        }
        Commands::Brightness { level } => {
            if level > 100 {
                anyhow::bail!("Brightness must be between 0 and 100");
            }
            deck.set_brightness(level)?;
            println!("Brightness set to: {}", level);
        }
        Commands::Color { button, color } => {
            let value = parse_hex_color(&color)
                .with_context(|| format!("Invalid color: {}. Use #RRGGBB", color))?;
            deck.draw_color(value, button)?;
            println!("Button {} filled with: {}", button, color);
        }
        Commands::Image { button, path } => {
            deck.draw_image_file(&path, button)
                .with_context(|| format!("Failed to draw {}", path.display()))?;
            println!("Button {} drawn from: {}", button, path.display());
        }
        Commands::Raw { button, path, rgb } => {
            let pixels = std::fs::read(&path).context("Failed to read pixel file")?;
            deck.draw_image_buffer(&pixels, button, PixelFormat::from_alpha(!rgb))?;
            println!("Button {} drawn from: {}", button, path.display());
        }
        Commands::List | Commands::Watch | Commands::Run { .. } | Commands::Init { .. } => {
            anyhow::bail!("Command does not draw on the device")
        }
    }

    Ok(())
}

async fn handle_watch(deck: Arc<StreamDeck>) -> Result<()> {
    deck.on_pressed(ListenerOptions::unthrottled(), |button| {
        println!("down: {}", button)
    });
    deck.on_released(ListenerOptions::unthrottled(), |button| {
        println!("up: {}", button)
    });
    deck.on_state(ListenerOptions::unthrottled(), |state| {
        println!("state: {}", state)
    });

    println!("Watching keys, press Ctrl-C to stop");
    run_until_interrupted(deck).await
}

async fn handle_run(deck: Arc<StreamDeck>, config: Config) -> Result<()> {
    deck.reset()?;
    deck.set_brightness(config.brightness)?;

    let mut layout = HashMap::new();
    for button in &config.buttons {
        let idle = button.idle_face()?;
        let pressed = button.pressed_face()?;
        if let Some(face) = &idle {
            draw_face(&deck, face, button.button)
                .with_context(|| format!("Failed to draw button {}", button.button))?;
        }
        layout.insert(button.button, (idle, pressed));
    }
    let layout = Arc::new(layout);
    info!("Applied layout for {} button(s)", layout.len());

    let options = config.throttle.listener_options();

    let handle = deck.clone();
    let faces = layout.clone();
    deck.on_pressed(options, move |button| {
        if let Some((_, Some(face))) = faces.get(&button) {
            if let Err(e) = draw_face(&handle, face, button) {
                warn!("Failed to draw button {}: {}", button, e);
            }
        }
    });

    let handle = deck.clone();
    let faces = layout.clone();
    deck.on_released(options, move |button| {
        let result = match faces.get(&button) {
            Some((Some(face), Some(_))) => draw_face(&handle, face, button),
            Some((None, Some(_))) => handle
                .draw_color(0x000000, button)
                .map_err(anyhow::Error::from),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to draw button {}: {}", button, e);
        }
    });

    println!("Layout applied, press Ctrl-C to stop");
    run_until_interrupted(deck.clone()).await?;
    deck.reset()?;
    Ok(())
}

fn draw_face(deck: &StreamDeck, face: &Face, button: u8) -> Result<()> {
    match face {
        Face::Image(path) => {
            deck.draw_image_file(path, button)?;
        }
        Face::Color(color) => deck.draw_color(*color, button)?,
    }
    Ok(())
}

/// Polls the deck on a blocking thread until Ctrl-C.
async fn run_until_interrupted(deck: Arc<StreamDeck>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let reader_stop = stop.clone();
    let mut reader = tokio::task::spawn_blocking(move || -> Result<()> {
        while !reader_stop.load(Ordering::Relaxed) {
            deck.poll(Some(POLL_INTERVAL))?;
        }
        Ok(())
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping");
            stop.store(true, Ordering::Relaxed);
        }
        result = &mut reader => {
            return result.context("Reader task failed")?;
        }
    }

    reader.await.context("Reader task failed")?
}
