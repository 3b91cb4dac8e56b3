//! Routing state shared by all connection readers
//!
//! [`RouterState`] holds every live peer together with its subscription
//! and outbound queue. It is only ever used under the server's lock, so a
//! message is fanned out against one consistent view of who listens to
//! what. Delivery never blocks: a peer whose queue is full or closed is
//! cancelled and removed by its own reader task.

use crate::device::Device;
use crate::event::ServerEvent;
use crate::subscription::Subscription;
use bytes::Bytes;
use indi_core::Timestamp;
use indi_protocol::{
    DelProperty, EnableBlob, Frame, GetProperties, IndiMessage, IndiMessageEncoder, NewVector,
};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Router-local peer number
pub(crate) type PeerId = u64;

/// Outbound side and subscription of one peer
#[derive(Debug)]
pub(crate) struct PeerHandle {
    /// Device identifier or client address, for logs
    label: String,
    /// Bounded queue drained by the peer's writer task
    outbound: mpsc::Sender<Bytes>,
    /// Cancelling it ends the peer's reader and writer
    cancel: CancellationToken,
    /// What the peer asked to receive and its BLOB policy
    subscription: Subscription,
}

impl PeerHandle {
    pub(crate) fn new(label: &str, outbound: mpsc::Sender<Bytes>, cancel: CancellationToken) -> Self {
        Self {
            label: label.to_string(),
            outbound,
            cancel,
            subscription: Subscription::new(),
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Queue a frame without waiting; a peer that cannot take it is
    /// cancelled
    pub(crate) fn deliver(&self, frame: &Bytes) {
        match self.outbound.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbound queue of {} is full, disconnecting", self.label);
                self.cancel.cancel();
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Output of {} already closed", self.label);
                self.cancel.cancel();
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct DevicePeer {
    pub(crate) handle: PeerHandle,
    pub(crate) device: Device,
}

#[derive(Debug)]
pub(crate) struct ClientPeer {
    pub(crate) handle: PeerHandle,
}

pub(crate) enum RemovedPeer {
    Device(DevicePeer),
    Client(ClientPeer),
}

#[derive(Debug, Default)]
pub(crate) struct RouterState {
    devices: BTreeMap<PeerId, DevicePeer>,
    clients: BTreeMap<PeerId, ClientPeer>,
    forward_enable_blob: bool,
}

impl RouterState {
    pub(crate) fn new(forward_enable_blob: bool) -> Self {
        Self {
            forward_enable_blob,
            ..Self::default()
        }
    }

    pub(crate) fn add_device(&mut self, id: PeerId, handle: PeerHandle, device: Device) {
        self.devices.insert(id, DevicePeer { handle, device });
    }

    pub(crate) fn add_client(&mut self, id: PeerId, handle: PeerHandle) {
        self.clients.insert(id, ClientPeer { handle });
    }

    /// Take a peer out of the live sets and cancel it
    ///
    /// For a device every peer listening to one of its names is sent a
    /// whole-device `delProperty`.
    pub(crate) fn remove(&mut self, id: PeerId) -> Option<RemovedPeer> {
        if let Some(peer) = self.devices.remove(&id) {
            peer.handle.cancel.cancel();
            for name in peer.device.names() {
                let gone = IndiMessage::DelProperty(DelProperty {
                    device: name.clone(),
                    name: None,
                    timestamp: Some(Timestamp::now()),
                    message: None,
                });
                match IndiMessageEncoder::encode(&gone) {
                    Ok(raw) => self.fan_out(id, &raw, |sub| sub.listens_to_device(name)),
                    Err(e) => log::warn!("Cannot encode removal of {}: {}", name, e),
                }
            }
            return Some(RemovedPeer::Device(peer));
        }

        self.clients.remove(&id).map(|peer| {
            peer.handle.cancel.cancel();
            RemovedPeer::Client(peer)
        })
    }

    pub(crate) fn device_by_identifier(&self, identifier: &str) -> Option<PeerId> {
        self.devices
            .iter()
            .find(|(_, peer)| peer.device.identifier() == identifier)
            .map(|(id, _)| *id)
    }

    pub(crate) fn device_identifiers(&self) -> Vec<String> {
        self.devices
            .values()
            .map(|peer| peer.device.identifier().to_string())
            .collect()
    }

    pub(crate) fn device_names(&self) -> Vec<String> {
        self.devices
            .values()
            .flat_map(|peer| peer.device.names().iter().cloned())
            .collect()
    }

    pub(crate) fn client_ids(&self) -> Vec<PeerId> {
        self.clients.keys().copied().collect()
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Route one message received from peer `from`
    ///
    /// Returns lifecycle events the message caused.
    pub(crate) fn route(&mut self, from: PeerId, frame: &Frame) -> Vec<ServerEvent> {
        if self.devices.contains_key(&from) {
            self.route_from_device(from, frame)
        } else if self.clients.contains_key(&from) {
            self.route_from_client(from, frame);
            Vec::new()
        } else {
            log::debug!("Message from removed peer {} dropped", from);
            Vec::new()
        }
    }

    fn route_from_device(&mut self, from: PeerId, frame: &Frame) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        match &frame.message {
            IndiMessage::Def(def) => {
                self.discover(from, &def.device);
                // A BLOB definition carries no payload; every listener needs it
                // to enable and use the BLOBs
                let blob = def.kind.is_blob();
                self.fan_out(from, &frame.raw, |sub| {
                    sub.listens_to_property(&def.device, &def.name)
                        && (blob || sub.accepts_non_blob(&def.device))
                });
            }
            IndiMessage::Set(set) => {
                self.discover(from, &set.device);
                let blob = set.kind.is_blob();
                self.fan_out(from, &frame.raw, |sub| {
                    sub.listens_to_property(&set.device, &set.name)
                        && if blob {
                            sub.accepts_blob(&set.device, &set.name)
                        } else {
                            sub.accepts_non_blob(&set.device)
                        }
                });
            }
            IndiMessage::Message(message) => match message.device.as_deref() {
                None => {
                    for peer in self.clients.values() {
                        peer.handle.deliver(&frame.raw);
                    }
                }
                Some(device) => self.fan_out(from, &frame.raw, |sub| sub.listens_to_device(device)),
            },
            IndiMessage::DelProperty(del) => {
                self.discover(from, &del.device);
                if del.name.is_none() {
                    events.push(ServerEvent::DeviceWithdrawn {
                        name: del.device.clone(),
                    });
                }
                self.fan_out(from, &frame.raw, |sub| sub.listens_to_device(&del.device));
            }
            IndiMessage::GetProperties(get) => self.handle_get_properties(from, get, &frame.raw),
            IndiMessage::EnableBlob(enable) => self.handle_enable_blob(from, enable, &frame.raw),
            IndiMessage::New(new) => {
                log::debug!("{} from device for {}.{} dropped", frame.message.tag(), new.device, new.name);
            }
        }
        events
    }

    fn route_from_client(&mut self, from: PeerId, frame: &Frame) {
        match &frame.message {
            IndiMessage::GetProperties(get) => self.handle_get_properties(from, get, &frame.raw),
            IndiMessage::New(new) => self.handle_new(from, new, &frame.raw),
            IndiMessage::EnableBlob(enable) => self.handle_enable_blob(from, enable, &frame.raw),
            other => log::debug!("{} from client dropped", other.tag()),
        }
    }

    fn handle_get_properties(&mut self, from: PeerId, get: &GetProperties, raw: &Bytes) {
        let Some(handle) = self.handle_mut(from) else {
            return;
        };
        handle
            .subscription
            .record_subscription(get.device.as_deref(), get.name.as_deref());

        match get.device.as_deref().and_then(|d| self.device_serving(d)) {
            Some(target) if target == from => {}
            Some(target) => {
                if let Some(peer) = self.devices.get(&target) {
                    peer.handle.deliver(raw);
                }
            }
            None => {
                for (id, peer) in &self.devices {
                    if *id != from {
                        peer.handle.deliver(raw);
                    }
                }
            }
        }
    }

    fn handle_new(&self, from: PeerId, new: &NewVector, raw: &Bytes) {
        let Some(client) = self.clients.get(&from) else {
            return;
        };
        if !client.handle.subscription.listens_to_property(&new.device, &new.name) {
            log::debug!(
                "{} is not subscribed to {}.{}, new values dropped",
                client.handle.label,
                new.device,
                new.name
            );
            return;
        }

        match self.device_serving(&new.device).and_then(|id| self.devices.get(&id)) {
            Some(peer) => peer.handle.deliver(raw),
            None => log::debug!("New values for unknown device {} dropped", new.device),
        }
    }

    fn handle_enable_blob(&mut self, from: PeerId, enable: &EnableBlob, raw: &Bytes) {
        let Some(handle) = self.handle_mut(from) else {
            return;
        };
        let listening = match enable.name.as_deref() {
            Some(name) => handle.subscription.listens_to_property(&enable.device, name),
            None => handle.subscription.listens_to_device(&enable.device),
        };
        if !listening {
            log::debug!("enableBLOB from {} for unsubscribed {} dropped", handle.label, enable.device);
            return;
        }
        handle
            .subscription
            .set_blob_policy(&enable.device, enable.name.as_deref(), enable.policy);

        if self.forward_enable_blob {
            match self.device_serving(&enable.device) {
                Some(target) if target != from => {
                    if let Some(peer) = self.devices.get(&target) {
                        peer.handle.deliver(raw);
                    }
                }
                _ => {}
            }
        }
    }

    fn discover(&mut self, from: PeerId, name: &str) {
        if let Some(peer) = self.devices.get_mut(&from) {
            peer.device.discover(name);
        }
    }

    fn device_serving(&self, name: &str) -> Option<PeerId> {
        self.devices
            .iter()
            .find(|(_, peer)| peer.device.has_name(name))
            .map(|(id, _)| *id)
    }

    fn handle_mut(&mut self, id: PeerId) -> Option<&mut PeerHandle> {
        if let Some(peer) = self.devices.get_mut(&id) {
            return Some(&mut peer.handle);
        }
        self.clients.get_mut(&id).map(|peer| &mut peer.handle)
    }

    /// Deliver to every peer except `except` whose subscription accepts
    /// the frame
    fn fan_out<F>(&self, except: PeerId, raw: &Bytes, accepts: F)
    where
        F: Fn(&Subscription) -> bool,
    {
        let peers = self
            .devices
            .iter()
            .map(|(id, peer)| (*id, &peer.handle))
            .chain(self.clients.iter().map(|(id, peer)| (*id, &peer.handle)));

        for (id, handle) in peers {
            if id != except && accepts(&handle.subscription) {
                handle.deliver(raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indi_core::{
        BlobEnable, BlobValue, ElementValue, PropertyKind, PropertyPermission, PropertyState,
    };
    use indi_protocol::{DefElement, DefVector, Message, OneElement, SetVector};

    struct TestPeer {
        rx: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    }

    impl TestPeer {
        fn received(&mut self) -> Vec<IndiMessage> {
            let mut messages = Vec::new();
            while let Ok(raw) = self.rx.try_recv() {
                messages.push(indi_protocol::decode_message(&raw).unwrap());
            }
            messages
        }
    }

    fn handle(label: &str, capacity: usize) -> (PeerHandle, TestPeer) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        (PeerHandle::new(label, tx, cancel.clone()), TestPeer { rx, cancel })
    }

    fn idle_device(identifier: &str) -> Device {
        let task = tokio::spawn(async { Ok::<(), indi_core::IndiError>(()) });
        Device::in_process(identifier, task, CancellationToken::new())
    }

    fn frame(message: IndiMessage) -> Frame {
        let raw = IndiMessageEncoder::encode(&message).unwrap();
        Frame { message, raw }
    }

    fn get_properties(device: Option<&str>, name: Option<&str>) -> Frame {
        frame(IndiMessage::GetProperties(GetProperties::new(device, name)))
    }

    fn set_vector(device: &str, name: &str, kind: PropertyKind) -> Frame {
        let value = match kind {
            PropertyKind::Blob => ElementValue::Blob(BlobValue::new(vec![1, 2, 3], ".fits")),
            _ => ElementValue::Text("x".into()),
        };
        frame(IndiMessage::Set(SetVector {
            kind,
            device: device.into(),
            name: name.into(),
            state: Some(PropertyState::Ok),
            timeout: None,
            timestamp: None,
            message: None,
            elements: vec![OneElement::new("E", value)],
        }))
    }

    fn enable_blob(device: &str, name: Option<&str>, policy: BlobEnable) -> Frame {
        frame(IndiMessage::EnableBlob(EnableBlob {
            device: device.into(),
            name: name.map(str::to_string),
            policy,
        }))
    }

    /// Router with device "CCD" (peer 1) and client peer 10
    fn ccd_and_client() -> (RouterState, TestPeer, TestPeer) {
        let mut state = RouterState::new(false);
        let (device_handle, device) = handle("ccd", 16);
        state.add_device(1, device_handle, idle_device("ccd"));
        let (client_handle, client) = handle("client", 16);
        state.add_client(10, client_handle);
        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        (state, device, client)
    }

    #[tokio::test]
    async fn test_names_discovered_from_device_messages() {
        let (state, _device, mut client) = ccd_and_client();
        assert_eq!(state.device_names(), vec!["CCD".to_string()]);
        assert_eq!(state.device_identifiers(), vec!["ccd".to_string()]);
        assert_eq!(state.device_by_identifier("ccd"), Some(1));
        // Nobody was subscribed yet
        assert!(client.received().is_empty());
    }

    #[tokio::test]
    async fn test_blob_delivery_policy() {
        let (mut state, _device, mut client) = ccd_and_client();
        state.route(10, &get_properties(Some("CCD"), None));

        state.route(1, &set_vector("CCD", "CCD1", PropertyKind::Blob));
        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        let received = client.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].property_name(), Some("TEMP"));

        state.route(10, &enable_blob("CCD", None, BlobEnable::Only));
        state.route(1, &set_vector("CCD", "CCD1", PropertyKind::Blob));
        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        let received = client.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].property_name(), Some("CCD1"));

        state.route(10, &enable_blob("CCD", None, BlobEnable::Also));
        state.route(10, &enable_blob("CCD", Some("CCD1"), BlobEnable::Never));
        state.route(1, &set_vector("CCD", "CCD1", PropertyKind::Blob));
        state.route(1, &set_vector("CCD", "CCD2", PropertyKind::Blob));
        let received = client.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].property_name(), Some("CCD2"));
    }

    fn def_vector(device: &str, name: &str, kind: PropertyKind) -> Frame {
        let value = match kind {
            PropertyKind::Blob => ElementValue::Blob(BlobValue::new(Vec::new(), "")),
            _ => ElementValue::Text("x".into()),
        };
        frame(IndiMessage::Def(DefVector {
            kind,
            device: device.into(),
            name: name.into(),
            label: None,
            group: None,
            state: PropertyState::Idle,
            permission: Some(PropertyPermission::ReadOnly),
            rule: None,
            timeout: None,
            timestamp: None,
            message: None,
            elements: vec![DefElement {
                name: "E".into(),
                label: None,
                value,
                number: None,
            }],
        }))
    }

    #[tokio::test]
    async fn test_blob_definitions_reach_every_listener() {
        let (mut state, _device, mut only) = ccd_and_client();
        let (default_handle, mut default) = handle("default", 16);
        state.add_client(11, default_handle);
        state.route(10, &get_properties(Some("CCD"), None));
        state.route(11, &get_properties(Some("CCD"), None));
        state.route(10, &enable_blob("CCD", None, BlobEnable::Only));

        state.route(1, &def_vector("CCD", "CCD1", PropertyKind::Blob));
        state.route(1, &def_vector("CCD", "TEMP", PropertyKind::Text));

        let received = only.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].tag(), "defBLOBVector");

        let received = default.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].tag(), "defBLOBVector");
        assert_eq!(received[1].tag(), "defTextVector");
    }

    #[tokio::test]
    async fn test_enable_blob_requires_subscription() {
        let (mut state, mut device, mut client) = ccd_and_client();
        state.route(10, &enable_blob("CCD", None, BlobEnable::Also));
        state.route(10, &get_properties(Some("CCD"), Some("TEMP")));
        device.received();

        state.route(1, &set_vector("CCD", "CCD1", PropertyKind::Blob));
        assert!(client.received().is_empty());
        // Not forwarded to the device by default
        assert!(device.received().is_empty());
    }

    #[tokio::test]
    async fn test_enable_blob_forwarding_hook() {
        let mut state = RouterState::new(true);
        let (device_handle, mut device) = handle("ccd", 16);
        state.add_device(1, device_handle, idle_device("ccd"));
        let (client_handle, _client) = handle("client", 16);
        state.add_client(10, client_handle);
        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));

        state.route(10, &get_properties(None, None));
        state.route(10, &enable_blob("CCD", None, BlobEnable::Also));
        let received = device.received();
        assert_eq!(received.len(), 2);
        assert!(matches!(received[1], IndiMessage::EnableBlob(_)));
    }

    #[tokio::test]
    async fn test_listener_scoping() {
        let (mut state, _device, mut all) = ccd_and_client();
        let (scoped_handle, mut scoped) = handle("scoped", 16);
        state.add_client(11, scoped_handle);
        let (mount_handle, _mount) = handle("mount", 16);
        state.add_device(2, mount_handle, idle_device("mount"));

        state.route(10, &get_properties(None, None));
        state.route(11, &get_properties(Some("CCD"), Some("TEMP")));

        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        state.route(1, &set_vector("CCD", "COOLER", PropertyKind::Text));
        state.route(2, &set_vector("Mount", "PARK", PropertyKind::Text));

        assert_eq!(all.received().len(), 3);
        let received = scoped.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].property_name(), Some("TEMP"));
    }

    #[tokio::test]
    async fn test_get_properties_targets_known_device() {
        let (mut state, mut ccd, _client) = ccd_and_client();
        let (mount_handle, mut mount) = handle("mount", 16);
        state.add_device(2, mount_handle, idle_device("mount"));

        state.route(10, &get_properties(Some("CCD"), None));
        assert_eq!(ccd.received().len(), 1);
        assert!(mount.received().is_empty());

        // Unknown device names are broadcast
        state.route(10, &get_properties(Some("Focuser"), None));
        assert_eq!(ccd.received().len(), 1);
        assert_eq!(mount.received().len(), 1);
    }

    #[tokio::test]
    async fn test_new_requires_subscription() {
        let (mut state, mut device, _client) = ccd_and_client();
        let new = frame(IndiMessage::New(NewVector {
            kind: PropertyKind::Text,
            device: "CCD".into(),
            name: "TEMP".into(),
            timestamp: None,
            elements: vec![OneElement::new("E", ElementValue::Text("y".into()))],
        }));

        state.route(10, &new);
        assert!(device.received().is_empty());

        state.route(10, &get_properties(Some("CCD"), Some("TEMP")));
        device.received();
        state.route(10, &new);
        let received = device.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].tag(), "newTextVector");
    }

    #[tokio::test]
    async fn test_messages_and_snooping_devices() {
        let (mut state, mut ccd, mut client) = ccd_and_client();
        let (mount_handle, mut mount) = handle("mount", 16);
        state.add_device(2, mount_handle, idle_device("mount"));

        // The mount snoops on the CCD; the request reaches the CCD only
        state.route(2, &get_properties(Some("CCD"), None));
        assert_eq!(ccd.received().len(), 1);

        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        assert_eq!(mount.received().len(), 1);
        assert!(client.received().is_empty());

        let broadcast = frame(IndiMessage::Message(Message {
            device: None,
            timestamp: None,
            message: Some("Dome closing".into()),
        }));
        state.route(1, &broadcast);
        assert_eq!(client.received().len(), 1);
        assert!(mount.received().is_empty());

        let device_message = frame(IndiMessage::Message(Message {
            device: Some("CCD".into()),
            timestamp: None,
            message: Some("Cooling".into()),
        }));
        state.route(1, &device_message);
        assert_eq!(mount.received().len(), 1);
        assert!(ccd.received().is_empty());
    }

    #[tokio::test]
    async fn test_whole_device_deletion_emits_event() {
        let (mut state, _device, mut client) = ccd_and_client();
        state.route(10, &get_properties(Some("CCD"), None));

        let del = frame(IndiMessage::DelProperty(DelProperty {
            device: "CCD".into(),
            name: None,
            timestamp: None,
            message: None,
        }));
        let events = state.route(1, &del);
        assert_eq!(events, vec![ServerEvent::DeviceWithdrawn { name: "CCD".into() }]);
        assert_eq!(client.received().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_device_notifies_listeners() {
        let (mut state, device, mut client) = ccd_and_client();
        state.route(10, &get_properties(None, None));

        let Some(RemovedPeer::Device(removed)) = state.remove(1) else {
            panic!("expected device");
        };
        assert_eq!(removed.device.names(), ["CCD"]);
        assert!(device.cancel.is_cancelled());
        assert!(state.device_names().is_empty());

        let received = client.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].device(), Some("CCD"));
        assert_eq!(received[0].tag(), "delProperty");

        assert!(matches!(state.remove(10), Some(RemovedPeer::Client(_))));
        assert!(state.remove(10).is_none());
        assert_eq!(state.client_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_cancels_peer() {
        let mut state = RouterState::new(false);
        let (device_handle, _device) = handle("ccd", 16);
        state.add_device(1, device_handle, idle_device("ccd"));
        let (slow_handle, slow) = handle("slow", 1);
        state.add_client(10, slow_handle);
        let (fast_handle, mut fast) = handle("fast", 16);
        state.add_client(11, fast_handle);
        state.route(10, &get_properties(None, None));
        state.route(11, &get_properties(None, None));

        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        assert!(!slow.cancel.is_cancelled());
        state.route(1, &set_vector("CCD", "TEMP", PropertyKind::Text));
        assert!(slow.cancel.is_cancelled());
        assert_eq!(fast.received().len(), 2);
    }
}
