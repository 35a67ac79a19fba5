//! # Smart Meter Driver
//!
//! Runs one B-route [`Session`] on a tokio task. The task owns the port, the
//! connect timeout, the observation scheduler and the facilities registry,
//! and reacts to one input at a time: a received chunk, a timer, or a request
//! from a [`SmartMeterHandle`]. Everything the caller needs to hear about
//! arrives on the notification channel returned by [`SmartMeter::spawn`].
//!
//! ```rust,no_run
//! use broute_rs::config::{SerialConfig, SessionConfig};
//! use broute_rs::smart_meter::SmartMeter;
//! use broute_rs::wisun::transport::open_serial;
//!
//! # async fn run() -> Result<(), broute_rs::SmartMeterError> {
//! let config = SessionConfig::new("00112233445566778899AABBCCDDEEFF", "0123456789AB");
//! let port = open_serial(&SerialConfig::new("/dev/ttyUSB0"))?;
//! let (meter, mut notifications) = SmartMeter::spawn(port, config);
//!
//! while let Some(note) = notifications.recv().await {
//!     if note.status.state == broute_rs::SessionState::Available && note.frame.is_none() {
//!         meter.get_e7().await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::SessionConfig;
use crate::constants::{EOJ_CONTROLLER, EOJ_SMART_METER};
use crate::echonet::facilities::{FacilitiesWatch, Found, IdentificationNumber};
use crate::echonet::object::{Eoj, Tid};
use crate::error::SmartMeterError;
use crate::observation::{FiredPoll, ObservationScheduler, PollDecision};
use crate::util::hex::format_hex_compact;
use crate::wisun::pan::PanDescriptor;
use crate::wisun::sender::ObjectPair;
use crate::wisun::session::{Action, Notification, Request, Session, SessionState};
use crate::wisun::transport::{ChunkReader, DonglePort};
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::io;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior, Sleep};

const CONTROL_QUEUE: usize = 32;

enum Control {
    Send {
        request: Request,
        reply: oneshot::Sender<Result<Tid, SmartMeterError>>,
    },
    StartObservation {
        base: Duration,
        reply: oneshot::Sender<Result<bool, SmartMeterError>>,
    },
    StopObservation {
        reply: oneshot::Sender<()>,
    },
    Search {
        address: String,
        object: Option<Eoj>,
        epc: Option<u8>,
        reply: oneshot::Sender<Option<Found>>,
    },
    Snapshot {
        reply: oneshot::Sender<String>,
    },
    IdentificationNumbers {
        reply: oneshot::Sender<Vec<IdentificationNumber>>,
    },
    ObserveFacilities {
        period: Duration,
        changed: UnboundedSender<String>,
        reply: oneshot::Sender<()>,
    },
    ResetRegistry {
        reply: oneshot::Sender<()>,
    },
    State {
        reply: oneshot::Sender<(SessionState, Option<String>)>,
    },
    Pan {
        reply: oneshot::Sender<PanDescriptor>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
}

pub struct SmartMeter;

impl SmartMeter {
    /// Starts the driver task on `port` and begins the bootstrap.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<P: DonglePort>(port: P, config: SessionConfig) -> (SmartMeterHandle, UnboundedReceiver<Notification>) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (reader, writer) = tokio::io::split(port);
        let (scheduler, polls) = ObservationScheduler::new(config.observation_dispersion());

        let session = Session::new(&config);
        let driver = Driver {
            reader: Some(ChunkReader::for_profile(reader, session.profile())),
            session,
            writer: Some(writer),
            scheduler,
            polls,
            control: control_rx,
            notifications: notify_tx,
            connect_timeout: None,
            pause: None,
            post_chunk_pause: config.post_chunk_pause(),
            watch: None,
            observation_epcs: config.observation_epcs.clone(),
        };
        tokio::spawn(driver.run());

        (SmartMeterHandle { control: control_tx }, notify_rx)
    }
}

/// Cloneable access to a running driver.
#[derive(Debug, Clone)]
pub struct SmartMeterHandle {
    control: mpsc::Sender<Control>,
}

impl SmartMeterHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Control) -> Result<T, SmartMeterError> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(make(reply))
            .await
            .map_err(|_| SmartMeterError::Closed)?;
        response.await.map_err(|_| SmartMeterError::Closed)
    }

    /// Sends a request and returns its transaction id once written.
    pub async fn send(&self, request: Request) -> Result<Tid, SmartMeterError> {
        self.call(|reply| Control::Send { request, reply }).await?
    }

    pub async fn get(&self, objects: ObjectPair, epc: u8) -> Result<Tid, SmartMeterError> {
        self.send(Request::Get { objects, epc }).await
    }

    pub async fn multi_get(&self, objects: ObjectPair, epcs: &[u8]) -> Result<Tid, SmartMeterError> {
        self.send(Request::MultiGet {
            objects,
            epcs: epcs.to_vec(),
        })
        .await
    }

    pub async fn get_e7(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::InstantaneousPower).await
    }

    pub async fn get_ea(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::CumulativeEnergyNormal).await
    }

    pub async fn get_eb(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::CumulativeEnergyReverse).await
    }

    pub async fn get_9f(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::GetPropertyMap).await
    }

    pub async fn get_d5(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::InstanceList).await
    }

    pub async fn get_static(&self) -> Result<Tid, SmartMeterError> {
        self.send(Request::Static).await
    }

    /// Starts polling the configured properties. Returns false if already running.
    pub async fn start_observation(&self, base: Duration) -> Result<bool, SmartMeterError> {
        self.call(|reply| Control::StartObservation { base, reply }).await?
    }

    pub async fn stop_observation(&self) -> Result<(), SmartMeterError> {
        self.call(|reply| Control::StopObservation { reply }).await
    }

    pub async fn search(&self, address: &str, object: Option<Eoj>, epc: Option<u8>) -> Result<Option<Found>, SmartMeterError> {
        let address = address.to_string();
        self.call(|reply| Control::Search {
            address,
            object,
            epc,
            reply,
        })
        .await
    }

    /// Key-sorted JSON of the registry.
    pub async fn snapshot(&self) -> Result<String, SmartMeterError> {
        self.call(|reply| Control::Snapshot { reply }).await
    }

    pub async fn identification_numbers(&self) -> Result<Vec<IdentificationNumber>, SmartMeterError> {
        self.call(|reply| Control::IdentificationNumbers { reply }).await
    }

    /// Compares the registry snapshot every `period` and yields it whenever it changed.
    pub async fn observe_facilities(&self, period: Duration) -> Result<UnboundedReceiver<String>, SmartMeterError> {
        let (changed, rx) = mpsc::unbounded_channel();
        self.call(|reply| Control::ObserveFacilities { period, changed, reply })
            .await?;
        Ok(rx)
    }

    pub async fn reset_registry(&self) -> Result<(), SmartMeterError> {
        self.call(|reply| Control::ResetRegistry { reply }).await
    }

    pub async fn state(&self) -> Result<SessionState, SmartMeterError> {
        Ok(self.call(|reply| Control::State { reply }).await?.0)
    }

    pub async fn peer_address(&self) -> Result<Option<String>, SmartMeterError> {
        Ok(self.call(|reply| Control::State { reply }).await?.1)
    }

    /// PAN descriptor learned so far, for reuse on the next start.
    pub async fn pan(&self) -> Result<PanDescriptor, SmartMeterError> {
        self.call(|reply| Control::Pan { reply }).await
    }

    /// Closes the port, cancels all timers and ends the driver task.
    pub async fn release(&self) -> Result<(), SmartMeterError> {
        self.call(|reply| Control::Release { reply }).await
    }
}

struct RegistryWatch {
    interval: Interval,
    watch: FacilitiesWatch,
    changed: UnboundedSender<String>,
}

struct Driver<P> {
    session: Session,
    reader: Option<ChunkReader<ReadHalf<P>>>,
    writer: Option<WriteHalf<P>>,
    scheduler: ObservationScheduler,
    polls: UnboundedReceiver<FiredPoll>,
    control: mpsc::Receiver<Control>,
    notifications: UnboundedSender<Notification>,
    connect_timeout: Option<Pin<Box<Sleep>>>,
    pause: Option<Pin<Box<Sleep>>>,
    post_chunk_pause: Duration,
    watch: Option<RegistryWatch>,
    observation_epcs: Vec<u8>,
}

impl<P: DonglePort> Driver<P> {
    async fn run(mut self) {
        let actions = self.session.open();
        self.perform(actions).await;

        loop {
            let reading = self.pause.is_none();
            tokio::select! {
                chunk = next_chunk(&mut self.reader), if reading => self.on_read(chunk).await,
                _ = elapsed(&mut self.pause) => self.pause = None,
                _ = elapsed(&mut self.connect_timeout) => {
                    self.connect_timeout = None;
                    let actions = self.session.on_connect_timeout();
                    self.perform(actions).await;
                }
                Some(fired) = self.polls.recv() => self.on_poll(fired).await,
                _ = tick(&mut self.watch) => self.on_watch_tick(),
                control = self.control.recv() => match control {
                    Some(control) => {
                        if self.on_control(control).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("all handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        info!("smart meter driver stopped");
    }

    async fn on_read(&mut self, chunk: io::Result<Option<Bytes>>) {
        match chunk {
            Ok(Some(chunk)) => {
                trace!("chunk {}", format_hex_compact(&chunk));
                let actions = self.session.on_chunk(&chunk);
                self.perform(actions).await;
                if !self.post_chunk_pause.is_zero() {
                    self.pause = Some(Box::pin(tokio::time::sleep(self.post_chunk_pause)));
                }
            }
            Ok(None) => {
                warn!("dongle port closed");
                self.reader = None;
                self.report(SmartMeterError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "dongle port closed",
                )));
            }
            Err(e) => {
                warn!("read from dongle failed: {}", e);
                self.reader = None;
                self.report(SmartMeterError::Io(e));
            }
        }
    }

    async fn on_poll(&mut self, fired: FiredPoll) {
        let key = &fired.key;
        let cached = self.session.registry().has_value(&key.address, key.object, key.epc);
        let PollDecision::Issue(key) = self.scheduler.on_fired(fired, cached) else {
            return;
        };

        let request = Request::Get {
            objects: ObjectPair::new(EOJ_CONTROLLER, key.object),
            epc: key.epc,
        };
        match self.session.request(&request) {
            Ok(out) => {
                if let Err(e) = self.write(&out.bytes).await {
                    self.report(e);
                }
            }
            Err(e) => debug!("poll {} not sent: {}", key, e),
        }
    }

    fn on_watch_tick(&mut self) {
        let Some(watcher) = self.watch.as_mut() else {
            return;
        };
        if !watcher.watch.changed(self.session.registry()) {
            return;
        }
        if watcher.changed.send(self.session.registry().snapshot_json()).is_err() {
            debug!("facilities watcher dropped");
            self.watch = None;
        }
    }

    /// Answers one control message; `Break` once the driver has to stop.
    async fn on_control(&mut self, control: Control) -> ControlFlow<()> {
        match control {
            Control::Send { request, reply } => {
                let result = match self.session.request(&request) {
                    Ok(out) => self.write(&out.bytes).await.map(|_| out.tid),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Control::StartObservation { base, reply } => {
                let result = match (self.session.state(), self.session.peer_address()) {
                    (SessionState::Available, Some(address)) => Ok(self.scheduler.start(
                        address,
                        EOJ_SMART_METER.into(),
                        &self.observation_epcs,
                        base,
                    )),
                    (state, _) => {
                        warn!("observation not started in state {}", state);
                        Err(SmartMeterError::NotAvailable(state))
                    }
                };
                let _ = reply.send(result);
            }
            Control::StopObservation { reply } => {
                self.scheduler.stop();
                let _ = reply.send(());
            }
            Control::Search {
                address,
                object,
                epc,
                reply,
            } => {
                let found = self.session.registry().search(&address, object, epc).map(Found::from);
                let _ = reply.send(found);
            }
            Control::Snapshot { reply } => {
                let _ = reply.send(self.session.registry().snapshot_json());
            }
            Control::IdentificationNumbers { reply } => {
                let _ = reply.send(self.session.registry().identification_numbers().to_vec());
            }
            Control::ObserveFacilities { period, changed, reply } => {
                let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.watch = Some(RegistryWatch {
                    interval,
                    watch: FacilitiesWatch::new(self.session.registry()),
                    changed,
                });
                let _ = reply.send(());
            }
            Control::ResetRegistry { reply } => {
                self.session.reset_registry();
                let _ = reply.send(());
            }
            Control::State { reply } => {
                let _ = reply.send((self.session.state(), self.session.peer_address().map(str::to_string)));
            }
            Control::Pan { reply } => {
                let _ = reply.send(self.session.pan().clone());
            }
            Control::Release { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Write(bytes) => {
                    if let Err(e) = self.write(&bytes).await {
                        self.report(e);
                    }
                }
                Action::ArmConnectTimeout(after) => {
                    debug!("connect timeout armed for {:?}", after);
                    self.connect_timeout = Some(Box::pin(tokio::time::sleep(after)));
                }
                Action::CancelConnectTimeout => self.connect_timeout = None,
                Action::Notify(note) => {
                    let _ = self.notifications.send(note);
                }
                Action::CloseTransport => self.close_transport().await,
                Action::StopObservation => self.scheduler.stop(),
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SmartMeterError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "dongle port closed"))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close_transport(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("closing dongle port: {}", e);
            }
        }
    }

    async fn shutdown(&mut self) {
        let actions = self.session.release();
        self.perform(actions).await;
        self.watch = None;
        self.pause = None;
    }

    /// Surfaces a transport error to the caller.
    fn report(&self, error: SmartMeterError) {
        let _ = self
            .notifications
            .send(Notification::failure(self.session.state(), error));
    }
}

async fn next_chunk<R>(reader: &mut Option<ChunkReader<R>>) -> io::Result<Option<Bytes>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.next_chunk().await,
        None => std::future::pending().await,
    }
}

async fn elapsed(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn tick(watch: &mut Option<RegistryWatch>) {
    match watch {
        Some(watch) => {
            watch.interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
