//! Local device
//!
//! Properties of the local radio and its discoverable mode. Limited
//! discoverable mode (LIAC) is temporary: a timer thread restores the
//! previous access code once the LIAC timeout passes, unless the
//! application changed the access code in the meantime.

use crate::constants::{
    GIAC, IAC_RANGE_END, IAC_RANGE_START, LIAC, LIAC_RETRY_DELAY, NOT_DISCOVERABLE,
};
use crate::{BluetoothAddress, BluetoothError, BluetoothStack, ClassOfDevice};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct LiacState {
    /// Bumped by every access code change; a timer only acts on its own
    generation: u64,
    closed: bool,
}

struct LiacShared {
    state: Mutex<LiacState>,
    changed: Condvar,
}

impl LiacShared {
    /// Sleep until `deadline`; `false` if the generation moved on
    fn sleep_until(&self, generation: u64, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.generation == generation && !state.closed {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.generation == generation && !state.closed
    }
}

/// The local Bluetooth device
pub struct LocalDevice {
    stack: Arc<BluetoothStack>,
    liac: Arc<LiacShared>,
}

impl LocalDevice {
    /// Local device of `stack`
    #[must_use]
    pub fn new(stack: Arc<BluetoothStack>) -> Self {
        Self {
            stack,
            liac: Arc::new(LiacShared {
                state: Mutex::new(LiacState {
                    generation: 0,
                    closed: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Local `BD_ADDR`
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.stack.port().local_address()
    }

    /// Local friendly name
    #[must_use]
    pub fn friendly_name(&self) -> Option<String> {
        self.stack.port().local_name()
    }

    /// Local class of device
    #[must_use]
    pub fn device_class(&self) -> ClassOfDevice {
        ClassOfDevice::from_raw(self.stack.port().device_class())
    }

    /// Power the radio on; returns whether it is on afterwards
    pub fn power_on(&self) -> bool {
        let port = self.stack.port();
        port.is_enabled() || port.enable()
    }

    /// Whether the radio is on
    #[must_use]
    pub fn is_powered_on(&self) -> bool {
        self.stack.port().is_enabled()
    }

    /// Current access code, `NOT_DISCOVERABLE` if none
    #[must_use]
    pub fn discoverable(&self) -> u32 {
        self.stack.port().access_code()
    }

    /// Set the access code the radio answers inquiries with
    ///
    /// Accepts GIAC, LIAC, `NOT_DISCOVERABLE` and the reserved IAC range.
    /// Setting LIAC schedules the return to the previous access code.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for other codes and a state error when the
    /// radio is off
    pub fn set_discoverable(&self, code: u32) -> Result<bool, BluetoothError> {
        let valid = code == NOT_DISCOVERABLE
            || code == GIAC
            || code == LIAC
            || (IAC_RANGE_START..=IAC_RANGE_END).contains(&code);
        if !valid {
            return Err(BluetoothError::InvalidArgument(format!(
                "invalid access code 0x{code:06X}"
            )));
        }
        let port = self.stack.port();
        if !port.is_enabled() {
            return Err(BluetoothError::State("radio is off"));
        }

        let previous = port.access_code();
        let generation = {
            let mut state = self.liac.state.lock();
            state.generation += 1;
            state.generation
        };
        self.liac.changed.notify_all();

        if !port.set_access_code(code) {
            warn!("[LOCAL] Port refused access code 0x{code:06X}");
            return Ok(false);
        }
        info!("[LOCAL] Access code set to 0x{code:06X}");
        if code == LIAC && previous != LIAC {
            self.schedule_liac_revert(generation, previous)?;
        }
        Ok(true)
    }

    fn schedule_liac_revert(&self, generation: u64, previous: u32) -> Result<(), BluetoothError> {
        let stack = Arc::clone(&self.stack);
        let liac = Arc::clone(&self.liac);
        let timeout = stack.options().liac_timeout;
        thread::Builder::new()
            .name("bt-liac".into())
            .spawn(move || revert_liac(&stack, &liac, generation, previous, timeout))
            .map(drop)
            .map_err(|err| BluetoothError::Transport(err.to_string()))
    }

    /// Set the major service class bits advertised in the class of device
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `mask` touches bits outside the major
    /// service classes
    pub fn set_service_classes(&self, mask: u32) -> Result<bool, BluetoothError> {
        if !ClassOfDevice::is_valid_service_mask(mask) {
            return Err(BluetoothError::InvalidArgument(format!(
                "invalid service class mask 0x{mask:06X}"
            )));
        }
        Ok(self.stack.port().set_service_classes(mask))
    }
}

impl Drop for LocalDevice {
    fn drop(&mut self) {
        self.liac.state.lock().closed = true;
        self.liac.changed.notify_all();
    }
}

impl core::fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalDevice")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn revert_liac(
    stack: &BluetoothStack,
    liac: &LiacShared,
    generation: u64,
    previous: u32,
    timeout: Duration,
) {
    let mut deadline = Instant::now() + timeout;
    loop {
        if !liac.sleep_until(generation, deadline) {
            debug!("[LOCAL] Access code changed, LIAC revert dropped");
            return;
        }
        let port = stack.port();
        if port.access_code() != LIAC {
            return;
        }
        if port.set_access_code(previous) {
            info!("[LOCAL] Limited discoverable mode ended, back to 0x{previous:06X}");
            return;
        }
        warn!("[LOCAL] Restoring access code 0x{previous:06X} failed, retrying");
        deadline = Instant::now() + LIAC_RETRY_DELAY;
    }
}
