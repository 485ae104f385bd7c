//! Registry of running camera workers
//!
//! The supervisor starts and stops one [`CameraWorker`] per camera id, owns the
//! zone table the workers read from, and keeps stopped workers' threads until
//! they have exited. Its lock only guards the registry map; no frame is read or
//! analyzed while it is held.
//!
//! SPDX-License-Identifier: GPL-3.0-or-later

use crate::events::CameraId;
use crate::frame_source::{FfmpegSourceFactory, OpenError, StreamOptions, StreamSource};
use crate::traits::{AlertSink, DetectionStore, FrameSourceFactory};
use crate::worker::{
    standard_detectors, CameraWorker, DetectorFactory, StopToken, WorkerPolicy, WorkerSetup,
    WorkerState, WorkerStats, WorkerStatus,
};
use crate::zone_store::ZoneStore;
use secureeye_motion_ai::config::PRESENCE_EVERY;
use secureeye_motion_ai::zone::Zone;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long `shutdown` waits for worker threads before leaving them behind.
/// Longer than a decoder reconnect, so a worker stuck in one still gets out.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum StartError {
    #[error("camera {0} is already running")]
    AlreadyRunning(CameraId),
    #[error("camera {camera_id} could not be opened: {source}")]
    Open {
        camera_id: CameraId,
        #[source]
        source: OpenError,
    },
    #[error("could not spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker for camera {0} exited before it finished starting")]
    Aborted(CameraId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StopError {
    #[error("camera {0} is not registered")]
    NotFound(CameraId),
}

struct WorkerEntry {
    generation: u64,
    source: StreamSource,
    stop: StopToken,
    status: Arc<WorkerStatus>,
    thread: Option<JoinHandle<()>>,
}

pub struct SupervisorBuilder {
    sink: Arc<dyn AlertSink>,
    opener: Option<Arc<dyn FrameSourceFactory>>,
    store: Option<Arc<dyn DetectionStore>>,
    detectors: DetectorFactory,
    policy: WorkerPolicy,
    shutdown_grace: Duration,
}

impl SupervisorBuilder {
    /// Frame source factory. Defaults to ffmpeg decoding paced at the frame rate
    /// implied by the policy.
    pub fn opener(mut self, opener: Arc<dyn FrameSourceFactory>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn store(mut self, store: Arc<dyn DetectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn detectors(mut self, detectors: DetectorFactory) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn policy(mut self, policy: WorkerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> DetectionSupervisor {
        let opener = self.opener.unwrap_or_else(|| {
            Arc::new(FfmpegSourceFactory::new(StreamOptions::paced(
                self.policy.frame_pace,
            )))
        });

        DetectionSupervisor {
            workers: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            zones: Arc::new(ZoneStore::new()),
            opener,
            sink: self.sink,
            store: self.store,
            detectors: self.detectors,
            policy: self.policy,
            shutdown_grace: self.shutdown_grace,
            next_generation: AtomicU64::new(0),
        }
    }
}

pub struct DetectionSupervisor {
    workers: Mutex<HashMap<CameraId, WorkerEntry>>,
    /// Threads of workers that were removed from the registry but may still be
    /// finishing a blocking read.
    retired: Mutex<Vec<JoinHandle<()>>>,
    zones: Arc<ZoneStore>,
    opener: Arc<dyn FrameSourceFactory>,
    sink: Arc<dyn AlertSink>,
    store: Option<Arc<dyn DetectionStore>>,
    detectors: DetectorFactory,
    policy: WorkerPolicy,
    shutdown_grace: Duration,
    next_generation: AtomicU64,
}

impl DetectionSupervisor {
    pub fn builder(sink: Arc<dyn AlertSink>) -> SupervisorBuilder {
        SupervisorBuilder {
            sink,
            opener: None,
            store: None,
            detectors: standard_detectors(true, PRESENCE_EVERY),
            policy: WorkerPolicy::default(),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Starts a worker for `camera_id` reading from `source`.
    ///
    /// Returns once the source is open. An id whose previous worker failed may
    /// be started again; an id with a live worker may not.
    pub fn start(&self, camera_id: &str, source: &str) -> Result<(), StartError> {
        let camera_id = CameraId::from(camera_id);
        let source = StreamSource::parse(source).map_err(|e| StartError::Open {
            camera_id: camera_id.clone(),
            source: e,
        })?;
        self.reap_retired();

        let worker = CameraWorker::new(WorkerSetup {
            camera_id: camera_id.clone(),
            source: source.clone(),
            opener: Arc::clone(&self.opener),
            zone: self.zones.reader(camera_id.clone()),
            detectors: (self.detectors)(),
            sink: Arc::clone(&self.sink),
            store: self.store.clone(),
            policy: self.policy.clone(),
        });
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let displaced = {
            let mut workers = self.lock_workers();
            if let Some(existing) = workers.get(&camera_id) {
                if !existing.status.state().is_terminal() {
                    return Err(StartError::AlreadyRunning(camera_id));
                }
            }
            workers.insert(
                camera_id.clone(),
                WorkerEntry {
                    generation,
                    source: source.clone(),
                    stop: worker.stop_token(),
                    status: worker.status(),
                    thread: None,
                },
            )
        };
        if let Some(previous) = displaced {
            debug!(
                "[{camera_id}] Replacing {} worker",
                previous.status.state()
            );
            self.retire(previous.thread);
        }

        let (thread, startup) = match worker.spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                self.remove_generation(&camera_id, generation);
                return Err(StartError::Spawn(e));
            }
        };

        let orphan = {
            let mut workers = self.lock_workers();
            match workers.get_mut(&camera_id) {
                Some(entry) if entry.generation == generation => {
                    entry.thread = Some(thread);
                    None
                }
                // Stopped while we were spawning.
                _ => Some(thread),
            }
        };
        self.retire(orphan);

        match startup.recv() {
            Ok(Ok(())) => {
                info!("[{camera_id}] Started on {source}");
                Ok(())
            }
            Ok(Err(e)) => {
                self.join_generation(&camera_id, generation);
                Err(StartError::Open {
                    camera_id,
                    source: e,
                })
            }
            Err(_) => {
                self.join_generation(&camera_id, generation);
                Err(StartError::Aborted(camera_id))
            }
        }
    }

    /// Signals the camera's worker to stop and unregisters it.
    ///
    /// Does not wait for the worker thread; no alert from this worker is
    /// published after this returns.
    pub fn stop(&self, camera_id: &str) -> Result<(), StopError> {
        let entry = self
            .lock_workers()
            .remove(camera_id)
            .ok_or_else(|| StopError::NotFound(CameraId::from(camera_id)))?;

        let state = entry.status.state();
        entry.stop.stop();
        info!("[{camera_id}] Stop requested while {state}");

        self.retire(entry.thread);
        self.reap_retired();
        Ok(())
    }

    /// Sets the zone for `camera_id`, whether or not it is running yet.
    /// A running worker picks it up on its next frame.
    pub fn update_zone(&self, camera_id: &str, zone: Zone) {
        let camera_id = CameraId::from(camera_id);
        match self.zones.set(&camera_id, zone) {
            Some(previous) if previous != zone => {
                info!("[{camera_id}] Zone changed from {previous} to {zone}")
            }
            Some(_) => {}
            None => info!("[{camera_id}] Zone set to {zone}"),
        }
    }

    pub fn zone(&self, camera_id: &str) -> Option<Zone> {
        self.zones.get(&CameraId::from(camera_id))
    }

    /// Removes the zone; the camera's worker skips analysis until a new one is set.
    pub fn clear_zone(&self, camera_id: &str) -> Option<Zone> {
        self.zones.clear(&CameraId::from(camera_id))
    }

    /// Ids of workers that have not stopped or failed, sorted.
    pub fn list(&self) -> Vec<CameraId> {
        let mut ids: Vec<CameraId> = self
            .lock_workers()
            .iter()
            .filter(|(_, entry)| !entry.status.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn state(&self, camera_id: &str) -> Option<WorkerState> {
        self.lock_workers()
            .get(camera_id)
            .map(|entry| entry.status.state())
    }

    pub fn stats(&self, camera_id: &str) -> Option<WorkerStats> {
        self.lock_workers()
            .get(camera_id)
            .map(|entry| entry.status.stats())
    }

    pub fn source(&self, camera_id: &str) -> Option<StreamSource> {
        self.lock_workers()
            .get(camera_id)
            .map(|entry| entry.source.clone())
    }

    /// Stops every worker and waits up to the shutdown grace for their threads.
    ///
    /// A thread still blocked after that is detached and logged; it exits on
    /// its own once its read returns.
    pub fn shutdown(&self) {
        let entries: Vec<(CameraId, WorkerEntry)> = self.lock_workers().drain().collect();
        for (_, entry) in &entries {
            entry.stop.stop();
        }

        let mut pending: Vec<JoinHandle<()>> = entries
            .into_iter()
            .filter_map(|(_, entry)| entry.thread)
            .collect();
        pending.append(&mut self.lock_retired());

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|thread| thread.is_finished());
            for thread in finished {
                let name = thread_name(&thread);
                if thread.join().is_err() {
                    error!("{name} panicked");
                }
            }
            pending = running;

            if pending.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for thread in &pending {
                    warn!(
                        "{} still blocked after {:?}, leaving it behind",
                        thread_name(thread),
                        self.shutdown_grace
                    );
                }
                break;
            }
            thread::sleep(JOIN_POLL);
        }
    }

    fn remove_generation(&self, camera_id: &CameraId, generation: u64) -> Option<WorkerEntry> {
        let mut workers = self.lock_workers();
        match workers.get(camera_id) {
            Some(entry) if entry.generation == generation => workers.remove(camera_id),
            _ => None,
        }
    }

    /// Unregisters a worker that exited during startup and waits for its thread.
    fn join_generation(&self, camera_id: &CameraId, generation: u64) {
        let thread = self
            .remove_generation(camera_id, generation)
            .and_then(|entry| entry.thread);
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }

    fn retire(&self, thread: Option<JoinHandle<()>>) {
        if let Some(thread) = thread {
            self.lock_retired().push(thread);
        }
    }

    fn reap_retired(&self) {
        let finished: Vec<JoinHandle<()>> = {
            let mut retired = self.lock_retired();
            let (finished, running) = mem::take(&mut *retired)
                .into_iter()
                .partition(|thread| thread.is_finished());
            *retired = running;
            finished
        };
        for thread in finished {
            let _ = thread.join();
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, HashMap<CameraId, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn thread_name(thread: &JoinHandle<()>) -> String {
    thread.thread().name().unwrap_or("worker thread").to_string()
}

impl Drop for DetectionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
