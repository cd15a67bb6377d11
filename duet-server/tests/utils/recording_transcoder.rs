use async_trait::async_trait;
use duet_server::{BridgeError, StartRequest, Transcoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Transcoder that records start calls instead of posting them.
#[derive(Clone, Default)]
pub struct RecordingTranscoder {
    requests: Arc<Mutex<Vec<StartRequest>>>,
    reject: Arc<AtomicBool>,
}

impl RecordingTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every following start with an error (still recorded).
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<StartRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    async fn start(&self, request: &StartRequest) -> Result<(), BridgeError> {
        tracing::debug!("[RecordingTranscoder] start room {}", request.room_id);
        self.requests.lock().unwrap().push(request.clone());

        if self.reject.load(Ordering::SeqCst) {
            return Err(BridgeError::Rejected("500 Internal Server Error: test".into()));
        }
        Ok(())
    }
}
