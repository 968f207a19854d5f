use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use picta_downloader::config::default_output_dir;
use picta_downloader::downloader::tools::ToolManager;
use picta_downloader::downloader::QualityOption;
use picta_downloader::logging;
use picta_downloader::{
    Catalog, DownloaderConfig, FetchMode, FormatSelector, Operation, SessionCoordinator, SessionEvent,
};

#[derive(Parser)]
#[command(name = "picta-dl")]
#[command(about = "Download videos from picta.cu with a chosen quality, audio track and subtitles")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// HTTP or SOCKS5 proxy for media downloads
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Less log output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the video, audio and subtitle streams of a page
    Discover {
        /// https://www.picta.cu/medias/... or https://www.picta.cu/embed/...
        url: String,

        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Discover, pick streams and download them into one file
    Download {
        url: String,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output file name (".mp4" is added when missing)
        #[arg(long)]
        name: Option<String>,

        /// Video option number
        #[arg(long, conflicts_with = "quality")]
        video: Option<usize>,

        /// Video quality, e.g. 720p or best
        #[arg(long)]
        quality: Option<String>,

        /// Audio option number, 0 for none
        #[arg(long)]
        audio: Option<usize>,

        /// Subtitle option number, 0 for none
        #[arg(long)]
        subtitle: Option<usize>,

        /// Download streams one after another
        #[arg(long)]
        sequential: bool,
    },

    /// Show whether ffmpeg and chromedriver are available
    Tools,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init_logging(verbosity(cli.verbose, cli.quiet)) {
        eprintln!("picta-dl: {:#}", err);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("picta-dl error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// `-v` count minus `-q` count
fn verbosity(verbose: u8, quiet: u8) -> i8 {
    (i16::from(verbose) - i16::from(quiet)).clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = DownloaderConfig::load(cli.config.as_deref())?;
    if cli.proxy.is_some() {
        config = config.with_proxy(cli.proxy);
    }

    match cli.command {
        Commands::Discover { url, json } => {
            let coordinator = SessionCoordinator::from_config(&config)?;
            let catalog = discover(&coordinator, &url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                print_catalog(&catalog);
            }
        }
        Commands::Download {
            url,
            output_dir,
            name,
            video,
            quality,
            audio,
            subtitle,
            sequential,
        } => {
            if sequential {
                config = config.with_fetch_mode(FetchMode::Sequential);
            }
            let coordinator = SessionCoordinator::from_config(&config)?;
            let catalog = discover(&coordinator, &url).await?;
            println!("Title: {}", catalog.title);

            let video = match (video, quality) {
                (Some(n), _) => pick_number(n, catalog.videos.len(), "video")?,
                (None, Some(q)) => FormatSelector::find_by_quality(&catalog, &q)
                    .with_context(|| format!("no video with quality {}", q))?,
                (None, None) => prompt_choice(
                    "Select video quality",
                    &FormatSelector::video_options(&catalog),
                    false,
                )?
                .context("a video stream is required")?,
            };
            let audio = optional_choice(audio, "Select audio track", &FormatSelector::audio_options(&catalog))?;
            let subtitle = optional_choice(
                subtitle,
                "Select subtitles",
                &FormatSelector::subtitle_options(&catalog),
            )?;

            let selection = catalog.select(video, audio, subtitle)?;
            let output_dir = output_dir.unwrap_or_else(default_output_dir);
            let op = coordinator.start_download(&catalog, selection, output_dir, name)?;
            let path = follow(op).await?;
            println!("Saved to {}", path.display());
        }
        Commands::Tools => {
            for tool in ToolManager::new().get_all_tools() {
                match (&tool.path, &tool.version) {
                    (Some(path), version) => println!(
                        "{:<13} {} ({})",
                        tool.name,
                        path,
                        version.as_deref().unwrap_or("unknown version")
                    ),
                    (None, _) => println!("{:<13} not found", tool.name),
                }
            }
        }
    }
    Ok(())
}

async fn discover(coordinator: &SessionCoordinator, url: &str) -> Result<Catalog> {
    let op = coordinator.start_discovery(url)?;
    follow(op).await
}

/// Print events until the operation ends; Ctrl-C cancels it
async fn follow<T>(mut op: Operation<T>) -> Result<T> {
    let mut cancelled = false;
    let mut progress_open = false;
    loop {
        tokio::select! {
            event = op.next_event() => match event {
                Some(event) => {
                    if let Some(text) = render_event(&event, &mut progress_open) {
                        eprint!("{}", text);
                        let _ = std::io::stderr().flush();
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                eprintln!("\nCancelling...");
                op.cancel();
                cancelled = true;
            }
        }
    }
    Ok(op.join().await?)
}

/// Stderr text for one event. Progress redraws the current line, anything
/// else first ends an open progress line.
fn render_event(event: &SessionEvent, progress_open: &mut bool) -> Option<String> {
    let text = match event {
        SessionEvent::Progress(p) => {
            *progress_open = true;
            return Some(match p.fraction() {
                Some(f) => format!("\r  {:<8} {:>5.1}%", p.role, f * 100.0),
                None => format!("\r  {:<8} {:>8.1} MB", p.role, p.bytes_downloaded as f64 / 1_048_576.0),
            });
        }
        SessionEvent::Status(message) => format!("{}\n", message),
        SessionEvent::Done { success: false, detail } => format!("{}\n", detail),
        SessionEvent::Done { success: true, .. } => String::new(),
        SessionEvent::CatalogReady(_) | SessionEvent::DiscoveryFailed(_) => return None,
    };
    if std::mem::take(progress_open) {
        return Some(format!("\n{}", text));
    }
    (!text.is_empty()).then_some(text)
}

fn print_options(heading: &str, options: &[QualityOption]) {
    println!("{}:", heading);
    if options.is_empty() {
        println!("  (none)");
    }
    for option in options {
        let mark = if option.is_recommended { " (recommended)" } else { "" };
        println!("  {}. {}{}", option.number, option.label, mark);
    }
}

fn print_catalog(catalog: &Catalog) {
    println!("Title: {}", catalog.title);
    print_options("Video", &FormatSelector::video_options(catalog));
    print_options("Audio", &FormatSelector::audio_options(catalog));
    print_options("Subtitles", &FormatSelector::subtitle_options(catalog));
}

fn pick_number(number: usize, available: usize, what: &str) -> Result<usize> {
    if number == 0 || number > available {
        bail!("{} option {} does not exist ({} available)", what, number, available);
    }
    Ok(number - 1)
}

/// `Some(0)` on the command line means none
fn optional_choice(flag: Option<usize>, heading: &str, options: &[QualityOption]) -> Result<Option<usize>> {
    match flag {
        Some(0) => Ok(None),
        Some(n) => pick_number(n, options.len(), heading).map(Some),
        None if options.is_empty() => Ok(None),
        None => prompt_choice(heading, options, true),
    }
}

/// Ask until the answer is a listed number (or 0 when `allow_none`)
fn prompt_choice(heading: &str, options: &[QualityOption], allow_none: bool) -> Result<Option<usize>> {
    print_options(heading, options);
    if allow_none {
        println!("  0. None");
    }

    let stdin = std::io::stdin();
    loop {
        print!("Choice (1-{}): ", options.len());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            bail!("no selection made");
        }
        match line.trim().parse::<usize>() {
            Ok(0) if allow_none => return Ok(None),
            Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
            _ => println!("Please enter a number from the list."),
        }
    }
}
