use crate::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rodio::decoder::DecoderError;
use rodio::{Decoder, OutputStream, Sink, Source};
use show_network::{AudioCue, CollaboratorError};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum AudioCommand {
    Play(Duration),
    Stop,
}

/// What callers see of the worker. `playing` changes as soon as a command is
/// queued; the worker only clears it once the last queued play has drained.
#[derive(Debug, Default)]
struct Playback {
    playing: bool,
    queued: usize,
}

impl Playback {
    fn queue_play(&mut self) {
        self.queued += 1;
        self.playing = true;
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn dequeue_play(&mut self) {
        self.queued = self.queued.saturating_sub(1);
    }

    fn settle(&mut self, sink_empty: bool) {
        if self.queued == 0 && sink_empty {
            self.playing = false;
        }
    }
}

#[derive(Clone, Default)]
struct SharedPlayback(Arc<Mutex<Playback>>);

impl SharedPlayback {
    fn lock(&self) -> MutexGuard<'_, Playback> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Plays the show track on a dedicated `media-player` thread, which owns the
/// output device. Commands are queued, never awaited.
pub struct AudioPlayer {
    commands: Option<Sender<AudioCommand>>,
    playback: SharedPlayback,
    worker: Option<JoinHandle<()>>,
}

impl AudioPlayer {
    /// Loads the whole file into memory and opens the output device.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(format!("Audio file not found: {}", path.display()).into());
        }
        let audio_data = Arc::new(std::fs::read(path)?);
        Decoder::new(Cursor::new(audio_data.to_vec()))?;
        info!("Preloaded audio file: {} ({} bytes)", path.display(), audio_data.len());

        let (commands, receiver) = crossbeam_channel::unbounded();
        let (ready, started) = crossbeam_channel::bounded(1);
        let playback = SharedPlayback::default();
        let worker = thread::Builder::new().name("media-player".to_string()).spawn({
            let playback = playback.clone();
            move || media_player(audio_data, receiver, playback, ready)
        })?;

        started
            .recv()
            .map_err(|_| "media player exited during startup".to_string())??;

        Ok(Self {
            commands: Some(commands),
            playback,
            worker: Some(worker),
        })
    }

    fn send(&self, command: AudioCommand) -> std::result::Result<(), CollaboratorError> {
        self.commands
            .as_ref()
            .ok_or("media player closed")?
            .send(command)
            .map_err(|_| "media player stopped".into())
    }
}

impl AudioCue for AudioPlayer {
    fn play_from(&self, offset_seconds: f32) -> std::result::Result<(), CollaboratorError> {
        let offset = Duration::try_from_secs_f32(offset_seconds.max(0.0))?;
        // Held across the send so the worker cannot dequeue before we count it.
        let mut playback = self.playback.lock();
        self.send(AudioCommand::Play(offset))?;
        playback.queue_play();
        Ok(())
    }

    fn stop(&self) -> std::result::Result<(), CollaboratorError> {
        self.playback.lock().stop();
        self.send(AudioCommand::Stop)
    }

    fn is_playing(&self) -> bool {
        self.playback.lock().playing
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        // Disconnecting the channel ends the worker loop.
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Media player panicked");
            }
        }
    }
}

fn media_player(
    audio_data: Arc<Vec<u8>>,
    commands: Receiver<AudioCommand>,
    playback: SharedPlayback,
    ready: Sender<std::result::Result<(), String>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            let _ = ready.send(Err(format!("Cannot open audio output: {e}")));
            return;
        }
    };
    let mut sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready.send(Err(format!("Cannot create audio sink: {e}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(AudioCommand::Play(offset)) => {
                playback.lock().dequeue_play();
                // A stopped sink ignores new sources.
                sink.stop();
                match Sink::try_new(&handle) {
                    Ok(fresh) => sink = fresh,
                    Err(e) => {
                        error!("Cannot create audio sink: {e}");
                        continue;
                    }
                }
                match cue(&audio_data, offset) {
                    Ok(source) => {
                        debug!("Playing from {:.2}s", offset.as_secs_f32());
                        sink.append(source);
                        sink.play();
                    }
                    Err(e) => error!("Cannot decode audio: {e}"),
                }
            }
            Ok(AudioCommand::Stop) => sink.stop(),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        playback.lock().settle(sink.empty());
    }

    sink.stop();
    playback.lock().stop();
    debug!("Media player stopped");
}

/// Decodes the track positioned at `offset`. Seeking happens here, before the
/// source reaches the mixer; formats that cannot seek fall back to skipping.
fn cue(
    audio_data: &[u8],
    offset: Duration,
) -> std::result::Result<Box<dyn Source<Item = i16> + Send>, DecoderError> {
    let mut decoder = Decoder::new(Cursor::new(audio_data.to_vec()))?;
    match decoder.try_seek(offset) {
        Ok(()) => Ok(Box::new(decoder)),
        Err(e) => {
            debug!("Cannot seek to {:.2}s ({e:?}), skipping instead", offset.as_secs_f32());
            Ok(Box::new(decoder.skip_duration(offset)))
        }
    }
}
