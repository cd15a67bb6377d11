use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ports a room needs: two peers times two kinds.
pub const PORTS_PER_ROOM: usize = 4;

/// Hands out RTP ports toward the transcoder. Each port `p` also implies
/// `p + 1` for RTCP, so ports are spaced by a step of at least two.
#[derive(Clone)]
pub struct PortAllocator {
    free: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16, step: u16) -> Self {
        let step = usize::from(step.max(2));
        let free = (start..=end)
            .step_by(step)
            .filter(|port| *port < u16::MAX)
            .collect();
        Self {
            free: Arc::new(Mutex::new(free)),
        }
    }

    /// Take `PORTS_PER_ROOM` ports, lowest first, or nothing at all.
    pub async fn allocate(&self) -> Option<[u16; PORTS_PER_ROOM]> {
        let mut free = self.free.lock().await;
        if free.len() < PORTS_PER_ROOM {
            return None;
        }

        let mut block = [0u16; PORTS_PER_ROOM];
        for slot in block.iter_mut() {
            *slot = free.pop_first()?;
        }
        Some(block)
    }

    pub async fn release(&self, ports: &[u16]) {
        self.free.lock().await.extend(ports.iter().copied());
    }

    pub async fn available(&self) -> usize {
        self.free.lock().await.len()
    }
}
