use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duet_server::{
    BridgeConfig, DuetServer, HttpTranscoder, MediasoupEngine, MemorySessionStore,
    RedisSessionStore, ServerConfig, SessionStore, Transcoder, ROOM_KEY_PREFIX,
    WAITING_QUEUE_KEY,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Random two-party pairing and media signaling server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling server.
    Serve(ServeArgs),
}

#[derive(clap::Args)]
struct ServeArgs {
    #[arg(long, env = "DUET_LISTEN", default_value = "0.0.0.0:4001")]
    listen: SocketAddr,

    /// Full redis URL. Takes precedence over the host/port/password triple.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "REDIS_PASSWORD")]
    redis_password: Option<String>,

    #[arg(long, default_value = WAITING_QUEUE_KEY)]
    queue_key: String,

    #[arg(long, default_value = ROOM_KEY_PREFIX)]
    room_key_prefix: String,

    #[arg(
        long,
        env = "DUET_STREAM_BASE_URL",
        default_value = "http://localhost:8080/streams"
    )]
    stream_base_url: String,

    /// Transcoder node, `host[:port]` or a full URL.
    #[arg(long, env = "STREAMPROCESS_WORKER_NODE_IP")]
    transcoder_url: Option<String>,

    #[arg(long, env = "LOCAL_BIND_IP", default_value = "127.0.0.1")]
    local_bind_ip: IpAddr,

    #[arg(long, env = "FFMPEG_CONTAINER_IP", default_value = "127.0.0.1")]
    transcoder_ip: IpAddr,

    #[arg(long, default_value_t = 40750)]
    rtp_port_start: u16,

    #[arg(long, default_value_t = 40990)]
    rtp_port_end: u16,

    /// Public address advertised in ICE candidates.
    #[arg(long, env = "MEDIASOUP_LISTENIP")]
    announced_ip: Option<IpAddr>,

    /// Local address the media worker binds its WebRTC sockets to.
    #[arg(long, env = "MEDIASOUP_BIND_IP", default_value = "0.0.0.0")]
    media_bind_ip: IpAddr,
}

impl ServeArgs {
    fn redis_url(&self) -> Option<String> {
        if let Some(url) = &self.redis_url {
            return Some(url.clone());
        }
        let host = self.redis_host.as_ref()?;
        Some(match &self.redis_password {
            Some(password) => format!("redis://:{}@{}:{}/", password, host, self.redis_port),
            None => format!("redis://{}:{}/", host, self.redis_port),
        })
    }

    fn into_config(self) -> ServerConfig {
        let defaults = BridgeConfig::default();
        ServerConfig {
            redis_url: self.redis_url(),
            listen_addr: self.listen,
            queue_key: self.queue_key,
            room_key_prefix: self.room_key_prefix,
            stream_base_url: self.stream_base_url,
            transcoder_url: self.transcoder_url,
            announced_ip: self.announced_ip,
            bridge: BridgeConfig {
                local_bind_ip: self.local_bind_ip,
                transcoder_ip: self.transcoder_ip,
                rtp_port_start: self.rtp_port_start,
                rtp_port_end: self.rtp_port_end,
                ..defaults
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Serve(args) => {
            let media_bind_ip = args.media_bind_ip;
            serve(args.into_config(), media_bind_ip).await
        }
    }
}

async fn serve(config: ServerConfig, media_bind_ip: IpAddr) -> Result<()> {
    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisSessionStore::connect_with_keys(url, &config.queue_key, &config.room_key_prefix)
                .await
                .context("Failed to connect to redis")?,
        ),
        None => {
            warn!("No redis configured; using the in-memory session store");
            Arc::new(MemorySessionStore::new())
        }
    };

    let media = MediasoupEngine::start(media_bind_ip, config.announced_ip)
        .await
        .context("Failed to start the media worker")?;

    let transcoder = match config.transcoder_url.as_deref() {
        Some(url) => Some(Arc::new(
            HttpTranscoder::new(url).context("Failed to build the transcoder client")?,
        ) as Arc<dyn Transcoder>),
        None => None,
    };

    let server = DuetServer::new(&config, Arc::new(media), store, transcoder);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, server.router())
        .await
        .context("Server error")?;

    Ok(())
}
