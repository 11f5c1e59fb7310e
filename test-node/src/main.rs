mod node;

use crate::node::DisplayNode;
use clap::Parser;
use show_network::protocol::MAX_DATAGRAM_SIZE;
use show_network::{Envelope, Message, NodeId, Origin, Role};
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::net::UdpSocket;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, trace, Instrument};
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, Error>;
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Simulated display node for rehearsing shows without the hardware
#[derive(Parser)]
#[command(name = "test-node")]
struct CLIArgs {
    /// Node id, 1-255
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..))]
    id: u8,

    /// Local address to receive commander messages on
    #[arg(short, long, default_value = "0.0.0.0:1225")]
    bind: SocketAddr,

    /// Where to announce ourselves until the commander has been heard from
    #[arg(short, long, default_value = "255.255.255.255:1224")]
    commander: SocketAddr,

    /// Never acknowledge PREPARE
    #[arg(long)]
    silent: bool,
}

async fn reply(socket: &UdpSocket, node: &DisplayNode, message: Message, to: SocketAddr) {
    let datagram = Envelope::new(Origin::Node(node.id()), message).encode();
    if let Err(e) = socket.send_to(&datagram, to).await {
        error!("Cannot reply to {to}: {e}");
    }
}

/// Announces the node, then answers the commander until cancelled.
async fn serve(
    socket: UdpSocket,
    mut node: DisplayNode,
    mut commander: SocketAddr,
    cancellation_token: CancellationToken,
) {
    let announcement = node.announce();
    reply(&socket, &node, announcement, commander).await;

    let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = select! {
            _ = cancellation_token.cancelled() => return,
            received = socket.recv_from(&mut buffer) => match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Error receiving message: {e}");
                    continue;
                }
            }
        };
        let message = match Envelope::decode(&buffer[..len], Role::Commander) {
            Ok(envelope) => envelope.message,
            Err(e) => {
                trace!("Dropping datagram from {from}: {e}");
                continue;
            }
        };

        commander = from;
        for response in node.handle(message) {
            reply(&socket, &node, response, commander).await;
        }
    }
}

async fn run(args: CLIArgs) -> Result<()> {
    let id = NodeId::new(args.id).ok_or("node id 0 is reserved")?;
    let socket = UdpSocket::bind(args.bind).await?;
    socket.set_broadcast(true)?;
    info!("Node {id} listening on {}", socket.local_addr()?);

    let cancellation_token = CancellationToken::new();
    let server = tokio::spawn(
        serve(
            socket,
            DisplayNode::new(id, !args.silent),
            args.commander,
            cancellation_token.clone(),
        )
        .instrument(info_span!("node", id = %id)),
    );

    tokio::signal::ctrl_c().await?;
    cancellation_token.cancel();
    server.await?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = CLIArgs::parse();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("node")
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

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
