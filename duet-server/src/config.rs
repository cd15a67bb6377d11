use crate::store::{ROOM_KEY_PREFIX, WAITING_QUEUE_KEY};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// `None` selects the in-memory session store.
    pub redis_url: Option<String>,
    pub queue_key: String,
    pub room_key_prefix: String,
    pub stream_base_url: String,
    /// `None` disables the transcoder call; bridges are still built.
    pub transcoder_url: Option<String>,
    pub announced_ip: Option<IpAddr>,
    pub bridge: BridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            redis_url: None,
            queue_key: WAITING_QUEUE_KEY.to_owned(),
            room_key_prefix: ROOM_KEY_PREFIX.to_owned(),
            stream_base_url: "http://localhost:8080/streams".to_owned(),
            transcoder_url: None,
            announced_ip: None,
            bridge: BridgeConfig::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Address the plain RTP transports listen on.
    pub local_bind_ip: IpAddr,
    /// Where the transcoder receives RTP.
    pub transcoder_ip: IpAddr,
    pub rtp_port_start: u16,
    pub rtp_port_end: u16,
    pub rtp_port_step: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            local_bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            transcoder_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_port_start: 40750,
            rtp_port_end: 40990,
            rtp_port_step: 10,
        }
    }
}
