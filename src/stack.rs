//! Bluetooth stack façade
//!
//! [`BluetoothStack`] is the single owner of the native port. It runs the
//! event pump, keeps inquiry state, and turns the asynchronous radio
//! procedures (remote name requests, authentication, encryption) into
//! blocking calls with a deadline.
//!
//! # Example
//!
//! ```rust,no_run
//! use sdpbird::{BluetoothAddress, BluetoothStack, NativePort, StackOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn name_of(port: Arc<dyn NativePort>) -> Result<(), sdpbird::BluetoothError> {
//!     let options = StackOptions {
//!         friendly_name_timeout: Duration::from_secs(5),
//!         ..StackOptions::default()
//!     };
//!     let stack = BluetoothStack::new(port, options)?;
//!     let peer = BluetoothAddress::from_hex("00:1A:7D:DA:71:13")?;
//!     match stack.ask_friendly_name(peer) {
//!         Some(name) => println!("{peer} is {name}"),
//!         None => println!("{peer} did not answer"),
//!     }
//!     Ok(())
//! }
//! ```

mod pump;
mod table;

use crate::discovery::DiscoveryListener;
use crate::event::BluetoothEvent;
use crate::port::NativePort;
use crate::{
    BluetoothAddress, BluetoothError, ClassOfDevice, InquiryStatus, RemoteDevice, StackOptions,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use pump::{EventPump, EventSink, PollGuard};
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use table::ResultTable;

#[derive(Default)]
struct InquiryState {
    listener: Option<Arc<dyn DiscoveryListener>>,
    guard: Option<PollGuard>,
    history: BTreeSet<BluetoothAddress>,
    cached: Vec<RemoteDevice>,
}

pub(crate) struct StackShared {
    port: Arc<dyn NativePort>,
    options: StackOptions,
    pump: EventPump,
    names: ResultTable<BluetoothAddress, Option<String>>,
    authentications: ResultTable<u16, bool>,
    encryptions: ResultTable<u16, Option<bool>>,
    inquiry: Mutex<InquiryState>,
}

impl EventSink for StackShared {
    fn process(&self, event: BluetoothEvent) {
        event.process(self);
    }
}

pub(crate) fn same_listener(a: &Arc<dyn DiscoveryListener>, b: &Arc<dyn DiscoveryListener>) -> bool {
    core::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl StackShared {
    pub(crate) fn devices_discovered(&self, devices: &[(BluetoothAddress, ClassOfDevice)]) {
        let (listener, fresh) = {
            let mut inquiry = self.inquiry.lock();
            let Some(listener) = inquiry.listener.clone() else {
                debug!("[STACK] Inquiry result without running inquiry");
                return;
            };
            let mut fresh = Vec::new();
            for &(address, class) in devices {
                if !inquiry.history.insert(address) {
                    continue;
                }
                let device = RemoteDevice::new(address).with_class_of_device(class);
                let device = match inquiry.cached.iter().position(|d| d.addr == address) {
                    Some(index) => {
                        let cached = &mut inquiry.cached[index];
                        cached.class_of_device = Some(class);
                        cached.clone()
                    }
                    None => {
                        inquiry.cached.push(device.clone());
                        device
                    }
                };
                fresh.push((device, class));
            }
            (listener, fresh)
        };
        for (device, class) in &fresh {
            debug!("[STACK] Discovered {} ({class})", device.addr);
            listener.device_discovered(device, *class);
        }
    }

    pub(crate) fn inquiry_completed(&self, status: InquiryStatus) {
        let (listener, guard) = {
            let mut inquiry = self.inquiry.lock();
            (inquiry.listener.take(), inquiry.guard.take())
        };
        drop(guard);
        match listener {
            Some(listener) => {
                info!("[STACK] Inquiry completed: {status:?}");
                listener.inquiry_completed(status);
            }
            None => debug!("[STACK] Inquiry complete without listener"),
        }
    }

    pub(crate) fn name_resolved(&self, address: BluetoothAddress, name: Option<String>) {
        if let Some(name) = &name {
            let mut inquiry = self.inquiry.lock();
            if let Some(cached) = inquiry.cached.iter_mut().find(|d| d.addr == address) {
                cached.name = Some(name.clone());
            }
        }
        self.names.publish(address, name);
    }

    pub(crate) fn authentication_completed(&self, handle: u16, success: bool) {
        self.authentications.publish(handle, success);
    }

    pub(crate) fn encryption_changed(&self, handle: u16, success: bool, enabled: bool) {
        self.encryptions.publish(handle, success.then_some(enabled));
    }
}

/// Bluetooth stack façade over a [`NativePort`]
pub struct BluetoothStack {
    shared: Arc<StackShared>,
}

impl BluetoothStack {
    /// Create a stack over the given port
    ///
    /// The event pump starts with the first operation that needs it.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the options do not validate
    pub fn new(port: Arc<dyn NativePort>, options: StackOptions) -> Result<Self, BluetoothError> {
        options.validate()?;
        let shared = Arc::new_cyclic(|weak: &Weak<StackShared>| {
            let sink: Weak<dyn EventSink> = weak.clone();
            StackShared {
                pump: EventPump::new(Arc::clone(&port), sink, options.poll_interval),
                port,
                options,
                names: ResultTable::new(),
                authentications: ResultTable::new(),
                encryptions: ResultTable::new(),
                inquiry: Mutex::new(InquiryState::default()),
            }
        });
        Ok(Self { shared })
    }

    /// The native port
    #[must_use]
    pub fn port(&self) -> &Arc<dyn NativePort> {
        &self.shared.port
    }

    /// Options the stack runs with
    #[must_use]
    pub fn options(&self) -> &StackOptions {
        &self.shared.options
    }

    /// Start an inquiry; results go to `listener` on the dispatcher thread
    ///
    /// # Errors
    /// Returns a state error if the radio is off, an inquiry is already
    /// running or the port refuses to start one
    pub fn start_inquiry(
        &self,
        access_code: u32,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<(), BluetoothError> {
        if !self.shared.port.is_enabled() {
            return Err(BluetoothError::State("radio is off"));
        }
        let mut inquiry = self.shared.inquiry.lock();
        if inquiry.listener.is_some() {
            return Err(BluetoothError::State("inquiry already running"));
        }
        let guard = self.shared.pump.acquire()?;
        inquiry.history.clear();
        if !self.shared.port.start_inquiry(access_code) {
            return Err(BluetoothError::State("inquiry could not be started"));
        }
        info!("[STACK] Inquiry started with access code 0x{access_code:06X}");
        inquiry.listener = Some(listener);
        inquiry.guard = Some(guard);
        Ok(())
    }

    /// Cancel the inquiry started by `listener`
    ///
    /// The listener is told `Terminated` on the calling thread. Returns
    /// `false` if `listener` has no inquiry running.
    pub fn cancel_inquiry(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        let (current, guard) = {
            let mut inquiry = self.shared.inquiry.lock();
            match &inquiry.listener {
                Some(current) if same_listener(current, listener) => {}
                _ => return false,
            }
            (inquiry.listener.take(), inquiry.guard.take())
        };
        if !self.shared.port.cancel_inquiry() {
            warn!("[STACK] Port failed to cancel the inquiry");
        }
        drop(guard);
        if let Some(current) = current {
            current.inquiry_completed(InquiryStatus::Terminated);
        }
        true
    }

    /// Whether an inquiry is running
    #[must_use]
    pub fn is_inquiry_running(&self) -> bool {
        self.shared.inquiry.lock().listener.is_some()
    }

    /// Devices found by inquiries so far
    #[must_use]
    pub fn cached_devices(&self) -> Vec<RemoteDevice> {
        self.shared.inquiry.lock().cached.clone()
    }

    /// Ask a remote device for its friendly name
    ///
    /// Blocks up to the friendly name timeout and returns `None` when no
    /// name arrives in time.
    pub fn ask_friendly_name(&self, address: BluetoothAddress) -> Option<String> {
        let _guard = self.shared.pump.acquire().ok()?;
        self.shared.names.discard(address);
        if !self.shared.port.ask_friendly_name(address) {
            debug!("[STACK] Port refused name request for {address}");
            return None;
        }
        self.shared
            .names
            .wait(address, self.shared.options.friendly_name_timeout)
            .flatten()
    }

    /// Authenticate the link to a connected device, bonding first if needed
    ///
    /// Returns `false` on failure, timeout, or when the device has no
    /// connection.
    pub fn authenticate(&self, address: BluetoothAddress) -> bool {
        let port = &self.shared.port;
        if port.is_authenticated(address) {
            return true;
        }
        let Some(handle) = port.connection_handle(address) else {
            return false;
        };
        if !port.is_paired(address) {
            let Some(passkey) = port.passkey(address) else {
                debug!("[STACK] No passkey for {address}");
                return false;
            };
            if !port.bond(address, &passkey) {
                warn!("[STACK] Bonding with {address} failed");
                return false;
            }
        }

        let Ok(_guard) = self.shared.pump.acquire() else {
            return false;
        };
        self.shared.authentications.discard(handle);
        if !port.authenticate(handle) {
            return false;
        }
        self.shared
            .authentications
            .wait(handle, self.shared.options.authenticate_timeout)
            .unwrap_or(false)
    }

    /// Switch encryption of the link to a connected device
    ///
    /// Returns `true` once the link reports the requested encryption state.
    pub fn encrypt(&self, address: BluetoothAddress, enable: bool) -> bool {
        let port = &self.shared.port;
        let Some(handle) = port.connection_handle(address) else {
            return false;
        };
        let Ok(_guard) = self.shared.pump.acquire() else {
            return false;
        };
        self.shared.encryptions.discard(handle);
        if !port.set_encryption(handle, enable) {
            return false;
        }
        self.shared
            .encryptions
            .wait(handle, self.shared.options.encrypt_timeout)
            .flatten()
            == Some(enable)
    }

    /// Stop the event pump; pending inquiries are left without completion
    pub fn shutdown(&self) {
        self.shared.pump.shutdown();
    }
}

impl Drop for BluetoothStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for BluetoothStack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BluetoothStack")
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::records;
    use crate::testing::{self, MockPort, Recorder};
    use std::time::Duration;

    fn options() -> StackOptions {
        StackOptions {
            poll_interval: Duration::from_millis(5),
            friendly_name_timeout: Duration::from_secs(5),
            authenticate_timeout: Duration::from_secs(5),
            encrypt_timeout: Duration::from_secs(5),
            ..StackOptions::default()
        }
    }

    fn stack(port: &Arc<MockPort>) -> BluetoothStack {
        testing::init_logging();
        BluetoothStack::new(Arc::clone(port) as Arc<dyn NativePort>, options()).unwrap()
    }

    fn peer(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, last])
    }

    #[test]
    fn test_inquiry_deduplicates_and_completes() {
        let port = Arc::new(MockPort::new());
        let stack = stack(&port);
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn DiscoveryListener> = recorder.clone();

        stack.start_inquiry(crate::constants::GIAC, Arc::clone(&listener)).unwrap();
        assert!(matches!(
            stack.start_inquiry(crate::constants::GIAC, Arc::clone(&listener)),
            Err(BluetoothError::State("inquiry already running"))
        ));

        port.push_event(records::inquiry_result(&[(peer(1), 0x005A_020C), (peer(2), 0x0000_0104)]));
        port.push_event(records::inquiry_result(&[(peer(1), 0x005A_020C)]));
        port.push_event(records::inquiry_complete(0));

        assert_eq!(recorder.wait_inquiry_completed(), Some(InquiryStatus::Completed));
        let found: Vec<_> = recorder.devices().into_iter().map(|(d, _)| d.addr).collect();
        assert_eq!(found, [peer(1), peer(2)]);
        assert!(!stack.is_inquiry_running());
        assert_eq!(stack.cached_devices().len(), 2);
        assert_eq!(port.started_inquiries(), [crate::constants::GIAC]);
    }

    #[test]
    fn test_inquiry_requires_radio() {
        let port = Arc::new(MockPort::new());
        port.set_enabled(false);
        let stack = stack(&port);
        let listener: Arc<dyn DiscoveryListener> = Arc::new(Recorder::default());
        assert_eq!(
            stack.start_inquiry(crate::constants::GIAC, listener),
            Err(BluetoothError::State("radio is off"))
        );
    }

    #[test]
    fn test_cancel_inquiry_only_by_owner() {
        let port = Arc::new(MockPort::new());
        let stack = stack(&port);
        let recorder = Arc::new(Recorder::default());
        let owner: Arc<dyn DiscoveryListener> = recorder.clone();
        let stranger: Arc<dyn DiscoveryListener> = Arc::new(Recorder::default());

        stack.start_inquiry(crate::constants::LIAC, Arc::clone(&owner)).unwrap();
        assert!(!stack.cancel_inquiry(&stranger));
        assert!(stack.cancel_inquiry(&owner));
        assert_eq!(recorder.inquiry_statuses(), [InquiryStatus::Terminated]);
        assert!(!stack.cancel_inquiry(&owner));

        // A late completion from the radio is not reported again.
        port.push_event(records::inquiry_complete(0));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.inquiry_statuses(), [InquiryStatus::Terminated]);
    }

    #[test]
    fn test_friendly_name_round_trip() {
        let port = Arc::new(MockPort::new());
        port.set_remote_name(peer(7), "Nokia 6230i");
        let stack = stack(&port);

        assert_eq!(stack.ask_friendly_name(peer(7)).as_deref(), Some("Nokia 6230i"));
    }

    #[test]
    fn test_friendly_name_timeout() {
        let port = Arc::new(MockPort::new());
        let stack = BluetoothStack::new(
            Arc::clone(&port) as Arc<dyn NativePort>,
            StackOptions {
                friendly_name_timeout: Duration::from_millis(50),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(stack.ask_friendly_name(peer(8)), None);
    }

    #[test]
    fn test_authenticate_bonds_unpaired_device() {
        let port = Arc::new(MockPort::new());
        port.connect(peer(3), 0x0042);
        port.set_passkey(peer(3), "0000");
        let stack = stack(&port);

        assert!(stack.authenticate(peer(3)));
        assert_eq!(port.bonded(), [(peer(3), "0000".to_string())]);
        assert!(stack.authenticate(peer(3)));
        assert_eq!(port.bonded().len(), 1);
    }

    #[test]
    fn test_authenticate_without_connection_or_passkey() {
        let port = Arc::new(MockPort::new());
        let stack = stack(&port);
        assert!(!stack.authenticate(peer(4)));

        port.connect(peer(4), 0x0043);
        assert!(!stack.authenticate(peer(4)));
        assert!(port.bonded().is_empty());
    }

    #[test]
    fn test_encrypt_waits_for_change() {
        let port = Arc::new(MockPort::new());
        port.connect(peer(5), 0x0044);
        let stack = stack(&port);

        assert!(stack.encrypt(peer(5), true));
        assert!(!stack.encrypt(peer(6), true));

        port.fail_link_requests(true);
        assert!(!stack.encrypt(peer(5), false));
    }
}
