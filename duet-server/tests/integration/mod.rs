
use std::sync::Arc;

use anyhow::Result;
use tracing::Level;

use duet_core::MatchedPayload;
use duet_server::{
    LoopbackMediaEngine, MemorySessionStore, ServerConfig, SessionStore, SignalingEngine,
};

use crate::utils::{MockSignalingOutput, RecordingTranscoder, ScriptedStore, TestClient};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// An engine wired to in-process collaborators the tests can inspect.
pub struct TestHarness {
    pub engine: SignalingEngine,
    pub signaling: MockSignalingOutput,
    pub store: MemorySessionStore,
    pub media: LoopbackMediaEngine,
    pub transcoder: RecordingTranscoder,
}

impl TestHarness {
    pub async fn client(&self) -> Result<TestClient> {
        TestClient::connect(&self.engine, &self.signaling).await
    }
}

pub fn create_test_engine() -> TestHarness {
    create_test_engine_with(LoopbackMediaEngine::new())
}

pub fn create_test_engine_with(media: LoopbackMediaEngine) -> TestHarness {
    let store = MemorySessionStore::new();
    build_harness(media, Arc::new(store.clone()), store)
}

/// An engine whose store calls the test can hold or fail.
pub fn create_test_engine_with_store(store: &ScriptedStore) -> TestHarness {
    build_harness(LoopbackMediaEngine::new(), Arc::new(store.clone()), store.memory())
}

fn build_harness(
    media: LoopbackMediaEngine,
    session_store: Arc<dyn SessionStore>,
    store: MemorySessionStore,
) -> TestHarness {
    let signaling = MockSignalingOutput::new();
    let transcoder = RecordingTranscoder::new();

    let engine = SignalingEngine::new(
        &ServerConfig::default(),
        Arc::new(media.clone()),
        session_store,
        Arc::new(signaling.clone()),
        Some(Arc::new(transcoder.clone())),
    );

    TestHarness {
        engine,
        signaling,
        store,
        media,
        transcoder,
    }
}

/// Two published clients paired through the queue: the first one waits and
/// becomes the offerer.
pub struct MatchedPair {
    pub offerer: TestClient,
    pub answerer: TestClient,
    pub offerer_match: MatchedPayload,
    pub answerer_match: MatchedPayload,
}

pub async fn create_matched_pair(harness: &TestHarness) -> Result<MatchedPair> {
    let mut offerer = harness.client().await?;
    offerer.publish().await?;
    offerer.wait_waiting().await?;

    let mut answerer = harness.client().await?;
    answerer.publish().await?;

    let answerer_match = answerer.wait_matched().await?;
    let offerer_match = offerer.wait_matched().await?;

    Ok(MatchedPair {
        offerer,
        answerer,
        offerer_match,
        answerer_match,
    })
}
