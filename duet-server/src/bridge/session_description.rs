use crate::bridge::bridge_session::StreamBridgeSession;
use std::fmt::Write;
use std::net::IpAddr;

/// Render the SDP the transcoder reads its four inputs from.
///
/// Streams are grouped per peer with `a=label:{peerId}-{kind}`; RTCP runs on
/// the port after each RTP port.
pub fn build_session_description(session: &StreamBridgeSession, address: IpAddr) -> String {
    let family = if address.is_ipv4() { "IP4" } else { "IP6" };
    let mut sdp = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(sdp, "v=0");
    let _ = writeln!(sdp, "o=- 0 0 IN {} {}", family, address);
    let _ = writeln!(sdp, "s=duet {}", session.room_id);
    let _ = writeln!(sdp, "c=IN {} {}", family, address);
    let _ = writeln!(sdp, "t=0 0");

    for leg in &session.legs {
        let codec = &leg.codec;
        let _ = writeln!(
            sdp,
            "m={} {} RTP/AVP {}",
            leg.kind, leg.port, codec.payload_type
        );
        let _ = writeln!(sdp, "a=rtcp:{}", leg.rtcp_port());
        match codec.channels {
            Some(channels) if channels > 1 => {
                let _ = writeln!(
                    sdp,
                    "a=rtpmap:{} {}/{}/{}",
                    codec.payload_type, codec.name, codec.clock_rate, channels
                );
            }
            _ => {
                let _ = writeln!(
                    sdp,
                    "a=rtpmap:{} {}/{}",
                    codec.payload_type, codec.name, codec.clock_rate
                );
            }
        }
        let _ = writeln!(sdp, "a=label:{}-{}", leg.peer_id, leg.kind);
        let _ = writeln!(sdp, "a=recvonly");
    }

    sdp
}
