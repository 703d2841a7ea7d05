//! Native event pump
//!
//! Two background threads, each started at most once:
//!
//! * **Poller**: while at least one [`PollGuard`] is alive, drains pending
//!   event records from the port, decodes them and queues them, then sleeps
//!   for the poll interval. With no guard alive it parks.
//! * **Dispatcher**: takes decoded events off the FIFO queue one at a time,
//!   in arrival order, and hands them to the [`EventSink`].
//!
//! Both threads start with the first guard. Shutdown stops the poller
//! first; its sender going away ends the dispatcher.

use crate::BluetoothError;
use crate::event::BluetoothEvent;
use crate::port::NativePort;
use crossbeam::channel::{Receiver, Sender, unbounded};
use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receiver of decoded events, called on the dispatcher thread
pub(crate) trait EventSink: Send + Sync {
    fn process(&self, event: BluetoothEvent);
}

#[derive(Default)]
struct PumpState {
    refs: usize,
    stopped: bool,
    poller: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

struct PumpShared {
    port: Arc<dyn NativePort>,
    sink: Weak<dyn EventSink>,
    poll_interval: Duration,
    state: Mutex<PumpState>,
    wake: Condvar,
}

pub(crate) struct EventPump {
    shared: Arc<PumpShared>,
}

/// Keeps the poller running while alive
pub(crate) struct PollGuard {
    shared: Arc<PumpShared>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.refs = state.refs.saturating_sub(1);
    }
}

impl core::fmt::Debug for PollGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PollGuard")
    }
}

impl EventPump {
    pub(crate) fn new(
        port: Arc<dyn NativePort>,
        sink: Weak<dyn EventSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(PumpShared {
                port,
                sink,
                poll_interval,
                state: Mutex::new(PumpState::default()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Keep the poller running until the guard is dropped
    pub(crate) fn acquire(&self) -> Result<PollGuard, BluetoothError> {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return Err(BluetoothError::State("stack is shut down"));
        }
        if state.poller.is_none() {
            self.start_threads(&mut state)?;
        }
        state.refs += 1;
        self.shared.wake.notify_all();
        Ok(PollGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    fn start_threads(&self, state: &mut PumpState) -> Result<(), BluetoothError> {
        let (sender, receiver) = unbounded();

        let sink = self.shared.sink.clone();
        let dispatcher = thread::Builder::new()
            .name("bt-dispatcher".into())
            .spawn(move || dispatch_loop(&receiver, &sink))
            .map_err(|err| BluetoothError::Transport(err.to_string()))?;

        let shared = Arc::clone(&self.shared);
        let poller = thread::Builder::new()
            .name("bt-poller".into())
            .spawn(move || poll_loop(&shared, &sender))
            .map_err(|err| BluetoothError::Transport(err.to_string()))?;

        debug!("[POLLER] Event pump started");
        state.dispatcher = Some(dispatcher);
        state.poller = Some(poller);
        Ok(())
    }

    /// Number of live guards
    pub(crate) fn active_guards(&self) -> usize {
        self.shared.state.lock().refs
    }

    /// Stop both threads; later `acquire` calls fail
    pub(crate) fn shutdown(&self) {
        let (poller, dispatcher) = {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            (state.poller.take(), state.dispatcher.take())
        };
        self.shared.wake.notify_all();
        join("poller", poller);
        join("dispatcher", dispatcher);
        debug!("[POLLER] Event pump stopped");
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn join(name: &str, handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        error!("[POLLER] The {name} thread panicked");
    }
}

fn poll_loop(shared: &PumpShared, sender: &Sender<BluetoothEvent>) {
    loop {
        {
            let mut state = shared.state.lock();
            while state.refs == 0 && !state.stopped {
                shared.wake.wait(&mut state);
            }
            if state.stopped {
                return;
            }
        }

        while shared.port.check_events() {
            let Some(record) = shared.port.read_event() else {
                break;
            };
            match BluetoothEvent::parse(&record) {
                Ok(event) => {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
                Err(err) => warn!("[POLLER] Dropping event record: {err}"),
            }
        }

        let mut state = shared.state.lock();
        if state.stopped {
            return;
        }
        shared.wake.wait_for(&mut state, shared.poll_interval);
    }
}

fn dispatch_loop(receiver: &Receiver<BluetoothEvent>, sink: &Weak<dyn EventSink>) {
    for event in receiver {
        let Some(sink) = sink.upgrade() else {
            debug!("[DISPATCHER] Stack gone, dropping {event:?}");
            continue;
        };
        sink.process(event);
    }
    debug!("[DISPATCHER] Event queue closed");
}
