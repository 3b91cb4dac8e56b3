//! Driver protocol loop
//!
//! The runner owns the driver and its context. Inbound bytes are decoded
//! and dispatched on the calling task; outbound messages are encoded and
//! written by a separate writer task so a driver never blocks on a slow
//! peer while holding its properties.

use crate::config::DriverConfig;
use crate::context::{CONNECT_ELEMENT, CONNECTION_PROPERTY, DriverContext};
use crate::driver::{Driver, NewValues};
use indi_core::{ElementValue, IndiResult, PropertyKind, PropertyPermission, SwitchStatus, Timestamp};
use indi_protocol::{IndiMessage, IndiMessageDecoder, IndiMessageEncoder, NewVector};
use indi_transport::{BoxedReader, BoxedWriter, ByteStream};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs one [`Driver`] against a byte stream
pub struct DriverRunner {
    driver: Box<dyn Driver>,
    config: DriverConfig,
}

impl DriverRunner {
    pub fn new(driver: Box<dyn Driver>, config: DriverConfig) -> Self {
        Self { driver, config }
    }

    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Run on a new task
    pub fn spawn(self, stream: ByteStream, cancel: CancellationToken) -> JoinHandle<IndiResult<()>> {
        tokio::spawn(self.run(stream, cancel))
    }

    /// Initialise the driver and serve requests until the stream ends or
    /// `cancel` fires
    ///
    /// On exit the driver is told it is being destroyed and a whole-device
    /// `delProperty` is sent.
    ///
    /// # Errors
    ///
    /// Errors from the driver's `init` and read failures on the stream
    pub async fn run(mut self, stream: ByteStream, cancel: CancellationToken) -> IndiResult<()> {
        let ByteStream { mut reader, writer } = stream;
        let name = self.driver.name().to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(name.clone(), writer, rx));
        let mut ctx = DriverContext::new(&name, tx, self.config.store.clone());

        let result = self.serve(&mut ctx, &mut reader, &cancel).await;
        if let Err(e) = &result {
            log::warn!("Driver {} failed: {}", name, e);
        }

        self.driver.is_being_destroyed(&mut ctx).await;
        ctx.remove_device(Some(&format!("Removing {}", name)));
        drop(ctx);

        if let Err(e) = writer_task.await {
            log::warn!("Writer of driver {} panicked: {}", name, e);
        }
        log::info!("Driver {} stopped", name);
        result
    }

    async fn serve(
        &mut self,
        ctx: &mut DriverContext,
        reader: &mut BoxedReader,
        cancel: &CancellationToken,
    ) -> IndiResult<()> {
        if self.driver.handles_connection() {
            ctx.add_connection_property()?;
        }
        self.driver.init(ctx).await?;
        log::info!("Driver {} initialised", ctx.device_name());

        let mut decoder = IndiMessageDecoder::with_chunk_size(self.config.read_chunk_size);
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = decoder.read_frame(reader) => frame?,
            };

            let Some(frame) = frame else {
                log::debug!("Input of driver {} closed", ctx.device_name());
                break;
            };

            if let Err(e) = self.dispatch(ctx, frame.message).await {
                log::warn!("Driver {}: {}", ctx.device_name(), e);
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, ctx: &mut DriverContext, message: IndiMessage) -> IndiResult<()> {
        match message {
            IndiMessage::GetProperties(get) => {
                if get.device.as_deref().is_some_and(|d| d != ctx.device_name()) {
                    return Ok(());
                }
                match get.name.as_deref() {
                    Some(name) => ctx.send_definitions(Some(name)),
                    None => {
                        ctx.send_definitions(None);
                        self.driver.properties_requested(ctx).await?;
                    }
                }
                Ok(())
            }
            IndiMessage::New(new) => self.handle_new(ctx, new).await,
            IndiMessage::EnableBlob(_) => Ok(()),
            other => {
                if other.device() == Some(ctx.device_name()) {
                    log::debug!("{}: ignoring echo of own {}", ctx.device_name(), other.tag());
                    return Ok(());
                }
                self.driver.process_snooped(ctx, &other).await
            }
        }
    }

    async fn handle_new(&mut self, ctx: &mut DriverContext, new: NewVector) -> IndiResult<()> {
        if new.device != ctx.device_name() {
            log::debug!("{}: new{} for device {} dropped", ctx.device_name(), new.kind, new.device);
            return Ok(());
        }
        let Some(property) = ctx.property(&new.name) else {
            log::debug!("{}: new values for unknown property {}", new.device, new.name);
            return Ok(());
        };
        if property.kind() != new.kind {
            log::debug!("{}.{}: expected {} values, got {}", new.device, new.name, property.kind(), new.kind);
            return Ok(());
        }
        if property.permission() == PropertyPermission::ReadOnly {
            log::debug!("{}.{} is read-only", new.device, new.name);
            return Ok(());
        }

        let mut accepted = Vec::with_capacity(new.elements.len());
        for one in new.elements {
            let Some(element) = property.element(&one.name) else {
                log::debug!("{}.{}: unknown element {}", new.device, new.name, one.name);
                continue;
            };
            match element.validate(&one.value) {
                Ok(()) => accepted.push((one.name, one.value)),
                Err(e) => log::debug!("{}.{}.{}: {}", new.device, new.name, one.name, e),
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }

        let timestamp = new.timestamp.unwrap_or_else(Timestamp::now);
        let property = new.name;
        match new.kind {
            PropertyKind::Switch => {
                let values = typed(accepted, |v| v.as_switch());
                if property == CONNECTION_PROPERTY && self.driver.handles_connection() {
                    return self.handle_connection(ctx, values, timestamp).await;
                }
                let values = NewValues { property, timestamp, values };
                self.driver.process_new_switch(ctx, values).await
            }
            PropertyKind::Text => {
                let values = typed(accepted, |v| match v {
                    ElementValue::Text(text) => Some(text),
                    _ => None,
                });
                let values = NewValues { property, timestamp, values };
                self.driver.process_new_text(ctx, values).await
            }
            PropertyKind::Number => {
                let values = typed(accepted, |v| v.as_number());
                let values = NewValues { property, timestamp, values };
                self.driver.process_new_number(ctx, values).await
            }
            PropertyKind::Blob => {
                let values = typed(accepted, |v| match v {
                    ElementValue::Blob(blob) => Some(blob),
                    _ => None,
                });
                let values = NewValues { property, timestamp, values };
                self.driver.process_new_blob(ctx, values).await
            }
            PropertyKind::Light => Ok(()),
        }
    }

    /// Drive the standard connection property
    ///
    /// Requests for the state the device is already in are confirmed
    /// without calling the driver. A failed attempt selects the opposite
    /// switch and reports the error.
    async fn handle_connection(
        &mut self,
        ctx: &mut DriverContext,
        values: Vec<(String, SwitchStatus)>,
        timestamp: Timestamp,
    ) -> IndiResult<()> {
        for (element, status) in values {
            if !status.is_on() {
                continue;
            }

            let connect = element == CONNECT_ELEMENT;
            if connect == ctx.is_connected() {
                ctx.set_connection(connect, None)?;
                continue;
            }

            let outcome = if connect {
                self.driver.connect(ctx, timestamp).await
            } else {
                self.driver.disconnect(ctx, timestamp).await
            };
            match outcome {
                Ok(()) => ctx.set_connection(connect, None)?,
                Err(e) => ctx.set_connection(!connect, Some(&e.to_string()))?,
            }
        }
        Ok(())
    }
}

fn typed<T>(
    values: Vec<(String, ElementValue)>,
    extract: impl Fn(ElementValue) -> Option<T>,
) -> Vec<(String, T)> {
    values
        .into_iter()
        .filter_map(|(name, value)| extract(value).map(|v| (name, v)))
        .collect()
}

async fn write_loop(name: String, mut writer: BoxedWriter, mut rx: mpsc::UnboundedReceiver<IndiMessage>) {
    while let Some(message) = rx.recv().await {
        let bytes = match IndiMessageEncoder::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Driver {}: cannot encode {}: {}", name, message.tag(), e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            log::debug!("Driver {}: output closed: {}", name, e);
            return;
        }
        if let Err(e) = writer.flush().await {
            log::debug!("Driver {}: output closed: {}", name, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DISCONNECT_ELEMENT;
    use async_trait::async_trait;
    use indi_core::{Element, IndiError, NumberSpec, PropertyState};
    use indi_protocol::{DefElement, DefVector, GetProperties, OneElement};
    use indi_transport::pipe_pair;
    use std::time::Duration;

    struct Focuser {
        fail_connect: bool,
    }

    #[async_trait]
    impl Driver for Focuser {
        fn name(&self) -> &str {
            "Focuser"
        }

        async fn init(&mut self, ctx: &mut DriverContext) -> IndiResult<()> {
            let property = ctx
                .builder(PropertyKind::Number, "POSITION")
                .element(Element::number("ABS", 0.0, NumberSpec::new("%6.0f", 0.0, 5000.0, 1.0)?)?)
                .build()?;
            ctx.add_property(property, None)
        }

        async fn process_new_number(
            &mut self,
            ctx: &mut DriverContext,
            values: NewValues<f64>,
        ) -> IndiResult<()> {
            let property = ctx
                .property_mut(&values.property)
                .ok_or_else(|| IndiError::NotFound(values.property.clone()))?;
            for (element, value) in &values.values {
                property.set_value(element, ElementValue::Number(*value))?;
            }
            property.set_state(PropertyState::Ok);
            ctx.update_property(&values.property, None)
        }

        async fn process_snooped(&mut self, ctx: &mut DriverContext, message: &IndiMessage) -> IndiResult<()> {
            ctx.send_message(&format!("snooped {}", message.tag()));
            Ok(())
        }

        fn handles_connection(&self) -> bool {
            true
        }

        async fn connect(&mut self, _ctx: &mut DriverContext, _timestamp: Timestamp) -> IndiResult<()> {
            if self.fail_connect {
                return Err(IndiError::Backend("port busy".into()));
            }
            Ok(())
        }
    }

    struct Peer {
        stream: ByteStream,
        decoder: IndiMessageDecoder,
    }

    impl Peer {
        async fn send(&mut self, message: IndiMessage) {
            let bytes = IndiMessageEncoder::encode(&message).unwrap();
            self.stream.writer.write_all(&bytes).await.unwrap();
        }

        async fn recv(&mut self) -> Option<IndiMessage> {
            tokio::time::timeout(Duration::from_secs(5), self.decoder.read_frame(&mut self.stream.reader))
                .await
                .unwrap()
                .unwrap()
                .map(|frame| frame.message)
        }

        async fn recv_set(&mut self) -> indi_protocol::SetVector {
            match self.recv().await {
                Some(IndiMessage::Set(set)) => set,
                other => panic!("expected set vector, got {:?}", other),
            }
        }
    }

    fn start(fail_connect: bool) -> (Peer, CancellationToken, JoinHandle<IndiResult<()>>) {
        let (local, remote) = pipe_pair(64 * 1024);
        let cancel = CancellationToken::new();
        let runner = DriverRunner::new(Box::new(Focuser { fail_connect }), DriverConfig::default());
        assert_eq!(runner.name(), "Focuser");
        let handle = runner.spawn(remote, cancel.clone());
        let peer = Peer {
            stream: local,
            decoder: IndiMessageDecoder::new(),
        };
        (peer, cancel, handle)
    }

    fn def_name(message: Option<IndiMessage>) -> String {
        match message {
            Some(IndiMessage::Def(def)) => def.name,
            other => panic!("expected definition, got {:?}", other),
        }
    }

    fn new_number(device: &str, value: f64) -> IndiMessage {
        IndiMessage::New(NewVector {
            kind: PropertyKind::Number,
            device: device.into(),
            name: "POSITION".into(),
            timestamp: None,
            elements: vec![OneElement::new("ABS", ElementValue::Number(value))],
        })
    }

    fn new_connection(element: &str) -> IndiMessage {
        IndiMessage::New(NewVector {
            kind: PropertyKind::Switch,
            device: "Focuser".into(),
            name: CONNECTION_PROPERTY.into(),
            timestamp: None,
            elements: vec![OneElement::new(element, ElementValue::Switch(SwitchStatus::On))],
        })
    }

    #[tokio::test]
    async fn test_definitions_on_start_and_request() {
        let (mut peer, cancel, handle) = start(false);
        assert_eq!(def_name(peer.recv().await), CONNECTION_PROPERTY);
        assert_eq!(def_name(peer.recv().await), "POSITION");

        // Not addressed to this driver
        peer.send(IndiMessage::GetProperties(GetProperties::new(Some("Mount"), None))).await;
        peer.send(IndiMessage::GetProperties(GetProperties::new(Some("Focuser"), Some("POSITION"))))
            .await;
        assert_eq!(def_name(peer.recv().await), "POSITION");

        peer.send(IndiMessage::GetProperties(GetProperties::new(None, None))).await;
        assert_eq!(def_name(peer.recv().await), CONNECTION_PROPERTY);
        assert_eq!(def_name(peer.recv().await), "POSITION");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_new_values_are_validated() {
        let (mut peer, cancel, handle) = start(false);
        peer.recv().await;
        peer.recv().await;

        peer.send(new_number("Mount", 10.0)).await;
        peer.send(new_number("Focuser", 9000.0)).await;
        peer.send(new_number("Focuser", 1200.0)).await;

        let set = peer.recv_set().await;
        assert_eq!(set.name, "POSITION");
        assert_eq!(set.state, Some(PropertyState::Ok));
        assert_eq!(set.elements[0].value, ElementValue::Number(1200.0));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_handling() {
        let (mut peer, cancel, handle) = start(false);
        peer.recv().await;
        peer.recv().await;

        peer.send(new_connection(CONNECT_ELEMENT)).await;
        let set = peer.recv_set().await;
        assert_eq!(set.name, CONNECTION_PROPERTY);
        assert_eq!(set.state, Some(PropertyState::Ok));
        assert_eq!(set.elements[0].value, ElementValue::Switch(SwitchStatus::On));
        assert_eq!(set.elements[1].value, ElementValue::Switch(SwitchStatus::Off));

        peer.send(new_connection(DISCONNECT_ELEMENT)).await;
        let set = peer.recv_set().await;
        assert_eq!(set.elements[0].value, ElementValue::Switch(SwitchStatus::Off));
        assert_eq!(set.elements[1].value, ElementValue::Switch(SwitchStatus::On));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_reports_alert() {
        let (mut peer, cancel, handle) = start(true);
        peer.recv().await;
        peer.recv().await;

        peer.send(new_connection(CONNECT_ELEMENT)).await;
        let set = peer.recv_set().await;
        assert_eq!(set.state, Some(PropertyState::Alert));
        assert_eq!(set.message.as_deref(), Some("Backend error: port busy"));
        assert_eq!(set.elements[1].value, ElementValue::Switch(SwitchStatus::On));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_snooped_messages() {
        let (mut peer, cancel, handle) = start(false);
        peer.recv().await;
        peer.recv().await;

        peer.send(IndiMessage::Def(DefVector {
            kind: PropertyKind::Text,
            device: "Mount".into(),
            name: "INFO".into(),
            label: None,
            group: None,
            state: PropertyState::Idle,
            permission: Some(PropertyPermission::ReadOnly),
            rule: None,
            timeout: None,
            timestamp: None,
            message: None,
            elements: vec![DefElement {
                name: "MODEL".into(),
                label: None,
                value: ElementValue::Text("EQ6".into()),
                number: None,
            }],
        }))
        .await;

        match peer.recv().await {
            Some(IndiMessage::Message(message)) => {
                assert_eq!(message.device.as_deref(), Some("Focuser"));
                assert_eq!(message.message.as_deref(), Some("snooped defTextVector"));
            }
            other => panic!("expected message, got {:?}", other),
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_removes_device() {
        let (mut peer, cancel, handle) = start(false);
        peer.recv().await;
        peer.recv().await;

        cancel.cancel();
        match peer.recv().await {
            Some(IndiMessage::DelProperty(del)) => {
                assert_eq!(del.device, "Focuser");
                assert_eq!(del.name, None);
            }
            other => panic!("expected delProperty, got {:?}", other),
        }
        assert!(peer.recv().await.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_stops_runner() {
        let (peer, _cancel, handle) = start(false);
        drop(peer);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
