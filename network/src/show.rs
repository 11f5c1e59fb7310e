use crate::config::ShowConfig;
use crate::protocol::{Message, MessageKind, NodeId};
use crate::receiver::MessageHandler;
use crate::registry::{Node, NodeRegistry};
use crate::sender::Sender;
use crate::CollaboratorError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A named show: where the audio cue sits in the track and which animation
/// each node plays. Slot `i` belongs to node `i + 1`; `None` leaves that node
/// alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub id: String,
    pub audio_cue: f32,
    pub animations: Vec<Option<String>>,
}

pub trait SequenceTable: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Sequence>;
}

impl SequenceTable for HashMap<String, Sequence> {
    fn resolve(&self, id: &str) -> Option<Sequence> {
        self.get(id).cloned()
    }
}

/// Local audio playback. Implementations hand the work to their own worker
/// and return without waiting for it.
pub trait AudioCue: Send + Sync {
    fn play_from(&self, offset_seconds: f32) -> Result<(), CollaboratorError>;
    fn stop(&self) -> Result<(), CollaboratorError>;
    fn is_playing(&self) -> bool;
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ShowError {
    #[error("No sequence with id '{0}' found")]
    UnknownSequence(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Settling,
    Running,
    Stopped,
}

/// Where in the track playback starts for a cue, never before its beginning.
pub fn playback_offset(audio_cue: f32, lead_time: f32) -> f32 {
    (audio_cue - lead_time).max(0.0)
}

struct ShowState {
    phase: Phase,
    audio_cue: f32,
    /// Bumped whenever a cycle begins or is stopped; a settle timer only
    /// commits the cycle it was created for.
    generation: u64,
    pending: Option<CancellationToken>,
}

impl ShowState {
    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct ShowController {
    registry: NodeRegistry,
    sender: Sender,
    sequences: Arc<dyn SequenceTable>,
    audio: Arc<dyn AudioCue>,
    settle_delay: Duration,
    lead_time: f32,
    state: Mutex<ShowState>,
}

impl ShowController {
    pub fn new(
        registry: NodeRegistry,
        sender: Sender,
        sequences: Arc<dyn SequenceTable>,
        audio: Arc<dyn AudioCue>,
        config: &ShowConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sender,
            sequences,
            audio,
            settle_delay: config.settle_delay(),
            lead_time: config.lead_time_seconds,
            state: Mutex::new(ShowState {
                phase: Phase::Idle,
                audio_cue: 0.0,
                generation: 0,
                pending: None,
            }),
        })
    }

    pub async fn phase(&self) -> Phase {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Running && !self.audio.is_playing() {
            state.phase = Phase::Idle;
        }
        state.phase
    }

    /// Sends every animation of `sequence_id` to its node and schedules the
    /// start. A call while another show is settling replaces it.
    pub async fn prepare(self: &Arc<Self>, sequence_id: &str) -> Result<(), ShowError> {
        let sequence = self
            .sequences
            .resolve(sequence_id)
            .ok_or_else(|| ShowError::UnknownSequence(sequence_id.to_string()))?;

        let generation = self.begin_cycle(&sequence).await;

        for (slot, animation) in sequence.animations.iter().enumerate() {
            let Some(animation) = animation else {
                continue;
            };
            let Some(id) = NodeId::from_slot(slot) else {
                warn!("Sequence '{}' has more slots than node ids", sequence.id);
                break;
            };
            self.send_prepare(id, animation).await;
        }

        self.schedule_start(generation, &sequence.id).await;
        Ok(())
    }

    /// Opens a new cycle in the Preparing phase and returns its generation.
    async fn begin_cycle(&self, sequence: &Sequence) -> u64 {
        let mut state = self.state.lock().await;
        if state.cancel_pending() {
            info!("Replacing pending show with '{}'", sequence.id);
        }
        state.generation += 1;
        state.phase = Phase::Preparing;
        state.audio_cue = sequence.audio_cue;
        state.generation
    }

    /// Arms the settle timer for `generation`. Returns false when a stop,
    /// commit or newer prepare superseded the cycle while its PREPAREs went out.
    async fn schedule_start(self: &Arc<Self>, generation: u64, sequence_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Show '{sequence_id}' was superseded while preparing");
            return false;
        }
        let token = CancellationToken::new();
        state.pending = Some(token.clone());
        state.phase = Phase::Settling;
        drop(state);

        let controller = self.clone();
        let settle_delay = self.settle_delay;
        tokio::spawn(
            async move {
                select! {
                    _ = token.cancelled() => debug!("Settle timer cancelled"),
                    _ = tokio::time::sleep(settle_delay) => controller.commit_cycle(generation).await,
                }
            }
            .instrument(info_span!("show", sequence = %sequence_id)),
        );
        true
    }

    async fn send_prepare(&self, id: NodeId, animation: &str) {
        let Some(node) = self.registry.rearm(id) else {
            warn!("Nothing playing on node {id}: node unknown, cannot send '{animation}'");
            return;
        };
        if let Err(e) = self.sender.unicast(&node, Message::prepare(animation)).await {
            error!("Cannot prepare node {id} for {animation}: {e}");
        }
    }

    /// Starts the current cycle right away, whether or not its settle timer
    /// has fired.
    pub async fn commit(&self) {
        let mut state = self.state.lock().await;
        state.cancel_pending();
        state.generation += 1;
        self.run(&mut state).await;
    }

    async fn commit_cycle(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Settle timer outlived its show cycle");
            return;
        }
        state.pending = None;
        self.run(&mut state).await;
    }

    async fn run(&self, state: &mut ShowState) {
        if !self.registry.all_prepared() {
            warn!("Not all nodes prepared");
        }
        if let Err(e) = self.sender.broadcast(Message::start()).await {
            error!("Cannot start animation: {e}");
        }

        let offset = playback_offset(state.audio_cue, self.lead_time);
        info!("Starting show, audio from {offset:.2}s");
        if let Err(e) = self.audio.play_from(offset) {
            error!("Cannot play audio: {e}");
        }
        state.phase = Phase::Running;
    }

    /// Cancels a pending start, tells every node to stop and halts audio.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.cancel_pending() {
            debug!("Cancelled pending show");
        }
        state.generation += 1;

        if let Err(e) = self.sender.broadcast(Message::stop()).await {
            error!("Cannot stop animation: {e}");
        }
        if let Err(e) = self.audio.stop() {
            error!("Cannot stop audio: {e}");
        }
        state.phase = Phase::Stopped;
    }
}

impl MessageHandler for ShowController {
    fn handle(&self, node: &Node, message: Message) {
        match message.kind {
            MessageKind::Prepare => {
                if self.registry.mark_prepared(node.id) {
                    debug!("Node {} prepared", node.id);
                }
            }
            MessageKind::Debug => info!("Node {}: {}", node.id, message.payload),
            MessageKind::Start | MessageKind::Stop => {
                trace!("Ignoring {message:?} from node {}", node.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::protocol::{Envelope, Role};
    use crate::receiver::NetworkService;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    enum AudioCall {
        Play(f32),
        Stop,
    }

    #[derive(Default)]
    struct RecordingAudio {
        calls: StdMutex<Vec<AudioCall>>,
        fail: bool,
    }

    impl RecordingAudio {
        fn calls(&self) -> Vec<AudioCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AudioCue for RecordingAudio {
        fn play_from(&self, offset_seconds: f32) -> Result<(), CollaboratorError> {
            self.calls.lock().unwrap().push(AudioCall::Play(offset_seconds));
            if self.fail {
                return Err("no output device".into());
            }
            Ok(())
        }

        fn stop(&self) -> Result<(), CollaboratorError> {
            self.calls.lock().unwrap().push(AudioCall::Stop);
            Ok(())
        }

        fn is_playing(&self) -> bool {
            matches!(self.calls().last(), Some(AudioCall::Play(_))) && !self.fail
        }
    }

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// A commander on an ephemeral port whose broadcasts land on `listener`.
    async fn commander(
        listener: &UdpSocket,
        sequences: HashMap<String, Sequence>,
        audio: Arc<RecordingAudio>,
    ) -> (NetworkService, Arc<ShowController>) {
        let config = NetworkConfig {
            bind_address: LOCALHOST,
            commander_port: 0,
            node_port: listener.local_addr().unwrap().port(),
            broadcast_address: LOCALHOST,
        };
        let service = NetworkService::bind(&config).await.unwrap();
        let show = ShowConfig {
            settle_delay_ms: 50,
            lead_time_seconds: 5.0,
        };
        let controller = ShowController::new(
            service.registry(),
            service.sender(),
            Arc::new(sequences),
            audio,
            &show,
        );
        (service, controller)
    }

    async fn next_message(listener: &UdpSocket) -> Message {
        let mut buffer = [0u8; 256];
        let (len, _) = timeout(Duration::from_secs(2), listener.recv_from(&mut buffer))
            .await
            .expect("no datagram received")
            .unwrap();
        Envelope::decode(&buffer[..len], Role::Commander).unwrap().message
    }

    #[test]
    fn cue_arithmetic() {
        assert_eq!(playback_offset(12.0, 5.0), 7.0);
        assert_eq!(playback_offset(10.0, 5.0), 5.0);
        assert_eq!(playback_offset(3.0, 5.0), 0.0);
    }

    #[tokio::test]
    async fn commit_without_nodes_starts_the_show() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let (_service, controller) = commander(&listener, HashMap::new(), audio.clone()).await;

        controller.commit().await;

        assert_eq!(next_message(&listener).await, Message::start());
        assert_eq!(audio.calls(), vec![AudioCall::Play(0.0)]);
        assert_eq!(controller.phase().await, Phase::Running);
    }

    #[tokio::test]
    async fn stop_when_idle_still_broadcasts() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let (_service, controller) = commander(&listener, HashMap::new(), audio.clone()).await;

        controller.stop().await;
        controller.stop().await;

        assert_eq!(next_message(&listener).await, Message::stop());
        assert_eq!(next_message(&listener).await, Message::stop());
        assert_eq!(audio.calls(), vec![AudioCall::Stop, AudioCall::Stop]);
        assert_eq!(controller.phase().await, Phase::Stopped);
    }

    #[tokio::test]
    async fn unknown_sequence_is_rejected() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let (_service, controller) = commander(&listener, HashMap::new(), audio.clone()).await;

        assert_eq!(
            controller.prepare("finale").await,
            Err(ShowError::UnknownSequence("finale".to_string()))
        );
        assert_eq!(controller.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn stop_cancels_the_settle_timer() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let sequences = HashMap::from([(
            "intro".to_string(),
            Sequence {
                id: "intro".to_string(),
                audio_cue: 12.0,
                animations: vec![],
            },
        )]);
        let (_service, controller) = commander(&listener, sequences, audio.clone()).await;

        controller.prepare("intro").await.unwrap();
        assert_eq!(controller.phase().await, Phase::Settling);
        controller.stop().await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(next_message(&listener).await, Message::stop());
        assert_eq!(audio.calls(), vec![AudioCall::Stop]);
    }

    #[tokio::test]
    async fn stop_while_preparing_abandons_the_cycle() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let sequence = Sequence {
            id: "outro".to_string(),
            audio_cue: 30.0,
            animations: vec![],
        };
        let sequences = HashMap::from([(sequence.id.clone(), sequence.clone())]);
        let (_service, controller) = commander(&listener, sequences, audio.clone()).await;

        let generation = controller.begin_cycle(&sequence).await;
        assert_eq!(controller.phase().await, Phase::Preparing);

        controller.stop().await;
        assert!(!controller.schedule_start(generation, &sequence.id).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(next_message(&listener).await, Message::stop());
        assert_eq!(audio.calls(), vec![AudioCall::Stop]);
        assert_eq!(controller.phase().await, Phase::Stopped);
    }

    #[tokio::test]
    async fn settle_timer_cues_audio_with_lead_time() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let sequences = HashMap::from([(
            "verse".to_string(),
            Sequence {
                id: "verse".to_string(),
                audio_cue: 12.0,
                animations: vec![None, Some("star.anim".to_string())],
            },
        )]);
        let (_service, controller) = commander(&listener, sequences, audio.clone()).await;

        // Node 2 is unknown, so the PREPARE is skipped and only START arrives.
        controller.prepare("verse").await.unwrap();

        assert_eq!(next_message(&listener).await, Message::start());
        assert_eq!(audio.calls(), vec![AudioCall::Play(7.0)]);
    }

    #[tokio::test]
    async fn audio_failure_leaves_controller_usable() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio {
            fail: true,
            ..Default::default()
        });
        let (_service, controller) = commander(&listener, HashMap::new(), audio.clone()).await;

        controller.commit().await;
        assert_eq!(next_message(&listener).await, Message::start());
        assert_eq!(controller.phase().await, Phase::Idle);

        controller.stop().await;
        assert_eq!(next_message(&listener).await, Message::stop());
    }

    #[tokio::test]
    async fn handler_tracks_acknowledgements() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let audio = Arc::new(RecordingAudio::default());
        let (service, controller) = commander(&listener, HashMap::new(), audio).await;
        let registry = service.registry();
        let node = registry.lookup_or_register(NodeId::new(4).unwrap(), LOCALHOST);

        controller.handle(&node, Message::debug("booted"));
        controller.handle(&node, Message::start());
        assert!(!registry.all_prepared());

        controller.handle(&node, Message::prepared());
        assert!(registry.all_prepared());
    }
}
