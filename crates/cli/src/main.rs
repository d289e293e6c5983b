use clap::{Parser, Subcommand};
use lib::gateway::{
    decode_frame, encode_frame, ConnectionStatus, GatewayTransport, StreamKind, TransportOptions,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether CLI — gateway transport client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration file with defaults.
    Init {
        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Issue one RPC against the gateway and print the JSON result.
    Call {
        /// Method name, e.g. "chat.list".
        method: String,

        /// Params as a JSON document.
        #[arg(long, short, value_name = "JSON")]
        params: Option<String>,

        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL (default from config)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Connect and print server-pushed events as JSON lines until Ctrl-C.
    Events {
        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL (default from config)
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Stream a terminal session: frames for the session go to
    /// stdout/stderr, local stdin is forwarded to the session.
    Attach {
        /// Terminal session id (UUID).
        session: String,

        /// Config file path (default: TETHER_CONFIG_PATH or ~/.tether/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway WebSocket URL (default from config)
        #[arg(long, short)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Call {
            method,
            params,
            config,
            url,
        }) => {
            if let Err(e) = run_call(config, url, method, params).await {
                log::error!("call failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Events { config, url }) => {
            if let Err(e) = run_events(config, url).await {
                log::error!("events failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Attach {
            session,
            config,
            url,
        }) => {
            if let Err(e) = run_attach(config, url, session).await {
                log::error!("attach failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    lib::config::write_default_config(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

/// Build a transport from config, start it, and wait until it is connected.
/// Fails on rejection, on a connection error when reconnect is off, or after
/// a 15 second timeout.
async fn connect_transport(
    config_path: Option<PathBuf>,
    url: Option<String>,
    reconnect: bool,
) -> anyhow::Result<GatewayTransport> {
    let (config, _) = lib::config::load_config(config_path)?;
    let url = url.unwrap_or_else(|| config.gateway.url.clone());
    let token = lib::config::resolve_gateway_token(&config);
    let transport = GatewayTransport::new(TransportOptions {
        url,
        client_id: config.client.id.clone(),
        auth_token: token,
        capabilities: config.client.capabilities.clone(),
        reconnect,
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sub = transport.on_state_change(move |state| {
        let _ = tx.send(state.clone());
    });
    transport.start();

    let outcome = tokio::time::timeout(Duration::from_secs(15), async {
        while let Some(state) = rx.recv().await {
            match state.status {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::Rejected => {
                    let reason = state
                        .rejection
                        .map(|r| r.reason)
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(anyhow::anyhow!("gateway rejected connection: {}", reason));
                }
                ConnectionStatus::Error if !reconnect => {
                    let err = state
                        .error
                        .unwrap_or_else(|| "connection error".to_string());
                    return Err(anyhow::anyhow!("gateway connection failed: {}", err));
                }
                _ => {}
            }
        }
        Err(anyhow::anyhow!("transport stopped before connecting"))
    })
    .await;
    sub.unsubscribe();

    match outcome {
        Ok(Ok(())) => Ok(transport),
        Ok(Err(e)) => {
            transport.stop();
            Err(e)
        }
        Err(_) => {
            transport.stop();
            Err(anyhow::anyhow!("timed out connecting to the gateway"))
        }
    }
}

async fn run_call(
    config_path: Option<PathBuf>,
    url: Option<String>,
    method: String,
    params: Option<String>,
) -> anyhow::Result<()> {
    let params = match params {
        Some(s) => Some(serde_json::from_str(&s).map_err(|e| {
            anyhow::anyhow!("--params is not valid JSON: {}", e)
        })?),
        None => None,
    };

    let transport = connect_transport(config_path, url, false).await?;
    let result = transport.call(&method, params).await;
    transport.stop();

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_events(config_path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<()> {
    let transport = connect_transport(config_path, url, true).await?;

    let _events = transport.on_event(|event| {
        let line = serde_json::json!({
            "topic": event.topic,
            "params": event.params,
        });
        println!("{}", line);
    });
    let _states = transport.on_state_change(|state| {
        log::info!("gateway state: {}", state.status);
    });

    tokio::signal::ctrl_c().await?;
    transport.stop();
    Ok(())
}

async fn run_attach(
    config_path: Option<PathBuf>,
    url: Option<String>,
    session: String,
) -> anyhow::Result<()> {
    let session: Uuid = session
        .parse()
        .map_err(|_| anyhow::anyhow!("session must be a UUID, got {:?}", session))?;

    let transport = connect_transport(config_path, url, true).await?;

    let _binary = transport.on_binary_message(move |bytes| {
        let frame = match decode_frame(bytes) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("ignoring undecodable binary frame: {}", e);
                return;
            }
        };
        if frame.session_id != session {
            return;
        }
        match frame.stream {
            StreamKind::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(&frame.payload);
                let _ = out.flush();
            }
            StreamKind::Stderr => {
                let mut err = std::io::stderr().lock();
                let _ = err.write_all(&frame.payload);
                let _ = err.flush();
            }
            StreamKind::Stdin => {}
        }
    });

    // Forward local stdin to the session. Blocking reads on a plain thread;
    // the thread dies with the process on Ctrl-C.
    let stdin_transport = transport.clone();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let frame = encode_frame(session, StreamKind::Stdin, &buf[..n]);
                    stdin_transport.send_binary(frame);
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    transport.stop();
    Ok(())
}
