use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::config::{PartialOutputPolicy, ReverseConfig};
use crate::error::ReverseError;
use crate::io::{
    clear_output_path, AssetMetadata, FrameSink, MediaAsset, OutputArtifact, SinkSettings,
};
use crate::pipeline::{CancelToken, Progress, ReversePipeline};
use crate::window::ChunkWindowPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Executing,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Cancelled | SessionStatus::Completed | SessionStatus::Failed
        )
    }
}

pub type SessionResult = Result<OutputArtifact, ReverseError>;

type Completion = Box<dyn FnOnce(SessionResult) + Send + 'static>;

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    error: Option<ReverseError>,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Command {
    Metadata(Result<AssetMetadata, ReverseError>),
    SinkReady,
    SinkFinalized,
    Cancel,
}

/// One reversal job: reads `asset` back to front and writes the reversed
/// video track to `output_path`.
///
/// All pipeline work runs on a dedicated worker thread. The completion
/// callback runs there exactly once, with the terminal outcome. Dropping the
/// session cancels it.
pub struct ReverseSession<A: MediaAsset> {
    id: SessionId,
    asset: Arc<A>,
    output_path: PathBuf,
    config: ReverseConfig,
    state: Arc<Mutex<SessionState>>,
    cancel: CancelToken,
    started: bool,
    commands: Option<mpsc::Sender<Command>>,
}

impl<A: MediaAsset> ReverseSession<A> {
    pub fn new(asset: A, output_path: impl Into<PathBuf>) -> Self {
        Self::with_config(asset, output_path, ReverseConfig::default())
    }

    pub fn with_config(asset: A, output_path: impl Into<PathBuf>, config: ReverseConfig) -> Self {
        Self {
            id: SessionId::new(),
            asset: Arc::new(asset),
            output_path: output_path.into(),
            config,
            state: Arc::new(Mutex::new(SessionState::default())),
            cancel: CancelToken::new(),
            started: false,
            commands: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status
    }

    pub fn error(&self) -> Option<ReverseError> {
        lock(&self.state).error.clone()
    }

    /// Starts reversing in the background.
    ///
    /// # Panics
    ///
    /// Panics if the session was already started, or if the worker thread
    /// cannot be spawned.
    pub fn start(&mut self, on_complete: impl FnOnce(SessionResult) + Send + 'static) {
        if std::mem::replace(&mut self.started, true) {
            panic!(
                "session {} started twice (status {:?})",
                self.id,
                self.status()
            );
        }
        {
            let mut state = lock(&self.state);
            let status = state.status;
            match status {
                SessionStatus::Idle => state.status = SessionStatus::Executing,
                SessionStatus::Cancelled => {
                    drop(state);
                    log::info!("session {}: cancelled before start", self.id);
                    on_complete(Err(ReverseError::Cancelled));
                    return;
                }
                status => panic!("session {} cannot start from {status:?}", self.id),
            }
        }
        log::info!(
            "session {}: reversing into {}",
            self.id,
            self.output_path.display()
        );

        let (tx, rx) = mpsc::channel();
        self.commands = Some(tx.clone());

        let parts = WorkerParts {
            id: self.id,
            asset: self.asset.clone(),
            output_path: self.output_path.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            completion: Box::new(on_complete),
            tx,
            rx,
        };
        if let Err(e) = std::thread::Builder::new()
            .name(format!("reverse-session-{}", self.id))
            .spawn(move || SessionWorker::new(parts).run())
        {
            panic!("session {}: failed to spawn worker thread: {e}", self.id);
        }
    }

    /// Starts the session and blocks until it reaches a terminal state.
    pub fn reverse_blocking(mut self) -> SessionResult {
        let (tx, rx) = mpsc::channel();
        self.start(move |result| {
            let _ = tx.send(result);
        });
        rx.recv().unwrap_or_else(|_| {
            Err(ReverseError::Internal(
                "session worker exited without reporting".into(),
            ))
        })
    }

    /// Requests cancellation. Does nothing once the session has reached a
    /// terminal state or is already cancelling.
    pub fn cancel(&self) {
        {
            let mut state = lock(&self.state);
            match state.status {
                SessionStatus::Idle => {
                    state.status = SessionStatus::Cancelled;
                    log::info!("session {}: cancelled while idle", self.id);
                    return;
                }
                SessionStatus::Executing => state.status = SessionStatus::Cancelling,
                _ => return,
            }
        }
        log::info!("session {}: cancelling", self.id);

        self.cancel.cancel();
        self.asset.cancel_loading();
        if let Some(tx) = &self.commands {
            let _ = tx.send(Command::Cancel);
        }
    }
}

impl<A: MediaAsset> Drop for ReverseSession<A> {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct WorkerParts<A> {
    id: SessionId,
    asset: Arc<A>,
    output_path: PathBuf,
    config: ReverseConfig,
    state: Arc<Mutex<SessionState>>,
    cancel: CancelToken,
    completion: Completion,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
}

/// Owns the pipeline. Every mutation happens on this worker's thread, in the
/// order commands arrive.
struct SessionWorker<A: MediaAsset> {
    id: SessionId,
    asset: Arc<A>,
    output_path: PathBuf,
    config: ReverseConfig,
    state: Arc<Mutex<SessionState>>,
    cancel: CancelToken,
    completion: Option<Completion>,
    tx: mpsc::Sender<Command>,
    rx: mpsc::Receiver<Command>,
    pipeline: Option<ReversePipeline<A::Source, A::Sink>>,
    output_opened: bool,
}

impl<A: MediaAsset> SessionWorker<A> {
    fn new(parts: WorkerParts<A>) -> Self {
        Self {
            id: parts.id,
            asset: parts.asset,
            output_path: parts.output_path,
            config: parts.config,
            state: parts.state,
            cancel: parts.cancel,
            completion: Some(parts.completion),
            tx: parts.tx,
            rx: parts.rx,
            pipeline: None,
            output_opened: false,
        }
    }

    fn run(mut self) {
        if let Err(e) = self.config.validate() {
            self.finish(Err(ReverseError::InvalidConfig(e.to_string())));
            return;
        }
        self.spawn_metadata_loader();

        while self.completion.is_some() {
            let Ok(command) = self.rx.recv() else {
                break;
            };
            self.handle(command);
        }
        log::debug!("session {}: worker exiting", self.id);
    }

    fn spawn_metadata_loader(&mut self) {
        let asset = self.asset.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("reverse-metadata-{}", self.id))
            .spawn(move || {
                let _ = tx.send(Command::Metadata(asset.load_metadata()));
            });
        if let Err(e) = spawned {
            self.finish(Err(ReverseError::MetadataLoadFailed(format!(
                "failed to spawn metadata loader: {e}"
            ))));
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Metadata(result) => {
                if lock(&self.state).status != SessionStatus::Executing {
                    return;
                }
                let attached = result.and_then(|metadata| self.attach(metadata));
                match attached {
                    Ok(pipeline) => self.pipeline = Some(pipeline),
                    Err(e) => self.finish(Err(e)),
                }
            }
            Command::SinkReady => {
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return;
                };
                match pipeline.on_ready() {
                    Ok(Progress::Waiting) => {}
                    Ok(Progress::Finalize) => {
                        log::info!(
                            "session {}: {} frames written from {} windows, finalizing",
                            self.id,
                            pipeline.frames_emitted(),
                            pipeline.windows_read()
                        );
                        let tx = self.tx.clone();
                        pipeline.finalize(Box::new(move || {
                            let _ = tx.send(Command::SinkFinalized);
                        }));
                    }
                    Err(e) => self.finish(Err(e)),
                }
            }
            Command::SinkFinalized => {
                let Some(pipeline) = self.pipeline.as_ref() else {
                    return;
                };
                let outcome = pipeline.outcome(&self.output_path);
                self.finish(outcome);
            }
            Command::Cancel => self.finish(Err(ReverseError::Cancelled)),
        }
    }

    fn attach(
        &mut self,
        metadata: AssetMetadata,
    ) -> Result<ReversePipeline<A::Source, A::Sink>, ReverseError> {
        let video = metadata
            .video
            .clone()
            .ok_or(ReverseError::NoReadableTrack)?;
        if metadata.duration.is_zero() {
            return Err(ReverseError::NothingToRead);
        }
        let rate = self.config.output_rate.resolve(video.frame_rate);
        log::info!(
            "session {}: {:.3}s of {}x{} video, writing at {rate} fps",
            self.id,
            metadata.duration.as_secs_f64(),
            video.width,
            video.height
        );

        let source = self.asset.open_source(&metadata)?;
        clear_output_path(&self.output_path)?;
        let sink = self.asset.open_sink(&SinkSettings {
            output_path: self.output_path.clone(),
            width: video.width,
            height: video.height,
            frame_rate: rate,
            bitrate: video.bitrate,
        })?;
        self.output_opened = true;

        let step = self
            .config
            .read_step()
            .map_err(|e| ReverseError::InvalidConfig(e.to_string()))?;
        let planner = ChunkWindowPlanner::new(metadata.duration, step);
        let mut pipeline = ReversePipeline::new(source, sink, planner, rate, self.cancel.clone());
        pipeline.start()?;

        let tx = self.tx.clone();
        pipeline
            .sink_mut()
            .request_data_when_ready(Box::new(move || {
                let _ = tx.send(Command::SinkReady);
            }));
        Ok(pipeline)
    }

    /// Sets the terminal state and fires the completion callback. Every call
    /// after the first is ignored.
    fn finish(&mut self, result: SessionResult) {
        let Some(completion) = self.completion.take() else {
            return;
        };

        let result = {
            let mut state = lock(&self.state);
            let result = if state.status == SessionStatus::Cancelling {
                Err(ReverseError::Cancelled)
            } else {
                result
            };
            let (status, error) = match &result {
                Ok(_) => (SessionStatus::Completed, None),
                Err(ReverseError::Cancelled) => (SessionStatus::Cancelled, None),
                Err(e) => (SessionStatus::Failed, Some(e.clone())),
            };
            state.status = status;
            state.error = error;
            result
        };

        // Source and sink are released before the output file is touched.
        if let Some(mut pipeline) = self.pipeline.take() {
            if result.is_err() {
                pipeline.cancel();
            }
        }
        if result.is_err() {
            self.dispose_partial_output();
        }

        match &result {
            Ok(artifact) => log::info!(
                "session {}: completed, {} frames ({:.3}s) in {}",
                self.id,
                artifact.frames,
                artifact.duration.as_secs_f64(),
                artifact.path.display()
            ),
            Err(ReverseError::Cancelled) => log::info!("session {}: cancelled", self.id),
            Err(e) => log::error!("session {}: failed: {e}", self.id),
        }
        completion(result);
    }

    fn dispose_partial_output(&self) {
        if !self.output_opened || self.config.partial_output == PartialOutputPolicy::Keep {
            return;
        }
        match std::fs::remove_file(&self.output_path) {
            Ok(()) => log::info!(
                "session {}: removed partial output {}",
                self.id,
                self.output_path.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "session {}: failed to remove partial output {}: {e}",
                self.id,
                self.output_path.display()
            ),
        }
    }
}
