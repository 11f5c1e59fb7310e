mod audio;
mod config;
mod sequences;

use clap::Parser;
use show_network::{NetworkService, NodeRegistry, ShowController};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, Error>;
pub type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "light-commander")]
#[command(about = "Starts light shows on the display nodes in sync with the local audio track")]
struct CLIArgs {
    /// Configuration file path (YAML format)
    #[arg(short, long, default_value = "commander.yaml")]
    config: PathBuf,
}

#[derive(Debug, PartialEq)]
enum Command {
    Prepare(String),
    Stop,
    Nodes,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Command::Empty;
    };
    if word.eq_ignore_ascii_case("quit") || word.eq_ignore_ascii_case("exit") {
        Command::Quit
    } else if word.eq_ignore_ascii_case("stop") {
        Command::Stop
    } else if word.eq_ignore_ascii_case("nodes") {
        Command::Nodes
    } else if word.eq_ignore_ascii_case("prepare") {
        match words.next() {
            Some(sequence) => Command::Prepare(sequence.to_string()),
            None => Command::Empty,
        }
    } else {
        // A bare sequence id prepares it as well.
        Command::Prepare(word.to_string())
    }
}

fn print_nodes(registry: &NodeRegistry) {
    let nodes = registry.all_known();
    if nodes.is_empty() {
        println!("No nodes found yet");
    }
    for node in nodes {
        let state = if node.prepared { "prepared" } else { "waiting" };
        println!("Node {} @ {}: {state}", node.id, node.address.ip());
    }
}

/// Reads the next prompt line. `None` ends the session: end of input or a
/// broken stdin. Lines that are not UTF-8 are reported and read as empty.
async fn next_command<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Option<Command> {
    match lines.next_line().await {
        Ok(line) => line.map(|line| parse_command(&line)),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            error!("Ignoring unreadable command: {e}");
            Some(Command::Empty)
        }
        Err(e) => {
            error!("Cannot read commands: {e}");
            None
        }
    }
}

async fn run(config: config::CommanderConfig, audio: Arc<audio::AudioPlayer>) -> Result<()> {
    let sequences = sequences::load_sequences(&config.sequence_file)?;
    info!("Loaded {} sequences", sequences.len());

    let network = NetworkService::bind(&config.network).await?;
    let registry = network.registry();
    let controller = ShowController::new(
        network.registry(),
        network.sender(),
        Arc::new(sequences),
        audio.clone(),
        &config.show,
    );
    network.start(controller.clone());

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        println!("Command: ");
        let Some(command) = next_command(&mut lines).await else {
            break;
        };
        match command {
            Command::Quit => break,
            Command::Stop => {
                println!("Stopping");
                controller.stop().await;
            }
            Command::Prepare(sequence) => {
                if let Err(e) = controller.prepare(&sequence).await {
                    error!("{e}");
                }
            }
            Command::Nodes => print_nodes(&registry),
            Command::Empty => {}
        }
    }

    controller.stop().await;
    network.shutdown().await;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = CLIArgs::parse();

    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    // Dropping the player joins its thread, which must not happen on a runtime worker.
    let audio = match audio::AudioPlayer::open(&config.audio_file) {
        Ok(audio) => Arc::new(audio),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("commander")
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Cannot start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(run(config, audio.clone()));
    drop(rt);
    drop(audio);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
