//! Session orchestrator: the typed command surface over a transport.
//!
//! Every outward command allocates a tag, registers it with the
//! pending-request registry before the payload hits the wire, sends,
//! and awaits the registry outcome. A background task decodes inbound
//! frames in arrival order: correlated responses complete their
//! registration, ACK pushes complete the registration keyed by their
//! code, prefix-addressed replies route through the binary index, and
//! everything else is broadcast to subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::contacts::ContactCache;
use crate::dedup::{ConversationKey, DedupConfig, MessageDedupCache, fingerprint};
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventSubscription};
use crate::protocol::codec::{self, Decoded};
use crate::protocol::command::{BinaryReqKind, MessageSendType};
use crate::protocol::packet::PacketCode;
use crate::registry::RequestRegistry;
use crate::transport::Transport;
use crate::types::contact::{Contact, PublicKey};
use crate::types::device::{BatteryStatus, Channel, DeviceInfo, RadioConfig, RemoteStatus, SelfInfo};
use crate::types::message::{Acknowledgment, ChannelMessage, DirectMessage};
use crate::types::telemetry::Telemetry;

/// Default timeout for locally answered commands.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for replies that cross the mesh.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Client identifier sent during the handshake.
pub const DEFAULT_CLIENT_ID: &str = "mccli";

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for device-local commands.
    pub rpc_timeout: Duration,
    /// Timeout for over-the-mesh replies (status, telemetry).
    pub remote_timeout: Duration,
    /// Event broadcast channel capacity.
    pub event_capacity: usize,
    /// Dedup window sizes.
    pub dedup: DedupConfig,
    /// Identifier presented in the handshake.
    pub client_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            event_capacity: crate::event::DEFAULT_EVENT_CAPACITY,
            dedup: DedupConfig::default(),
            client_id: DEFAULT_CLIENT_ID.into(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    #[must_use]
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    #[must_use]
    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }
}

/// Receipt for a message accepted by the device for transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReceipt {
    /// ACK code the receiving node will echo.
    pub expected_ack: u32,
    /// Firmware's delivery-time estimate.
    pub suggested_timeout: Duration,
}

/// A message fetched from the device queue.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Direct(DirectMessage),
    Channel(ChannelMessage),
}

/// An active session with a companion device.
pub struct Session<T> {
    transport: Arc<Mutex<T>>,
    dispatcher: EventDispatcher,
    registry: RequestRegistry,
    contacts: ContactCache,
    dedup: MessageDedupCache,
    config: SessionConfig,
    next_tag: AtomicU32,
    self_info: Arc<std::sync::RwLock<Option<SelfInfo>>>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> Session<T> {
    /// Connects the transport, starts the dispatch task, and performs
    /// the handshake.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot connect or the device does not
    /// answer the handshake in time.
    pub async fn connect(mut transport: T, config: SessionConfig) -> Result<Self> {
        transport.connect().await?;
        let mut frames = transport.take_frames().ok_or(Error::ConnectionLost)?;

        let dispatcher = EventDispatcher::new(config.event_capacity);
        let registry = RequestRegistry::new();
        let contacts = ContactCache::new();

        let dispatch_task = {
            let dispatcher = dispatcher.clone();
            let registry = registry.clone();
            let contacts = contacts.clone();
            tokio::spawn(async move {
                let mut cleanup = tokio::time::interval(Duration::from_secs(30));
                cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        frame = frames.recv() => match frame {
                            Some(payload) => {
                                dispatch_frame(&payload, &registry, &dispatcher, &contacts);
                            }
                            None => {
                                tracing::debug!("frame stream ended");
                                dispatcher.dispatch(Event::Disconnected);
                                return;
                            }
                        },
                        _ = cleanup.tick() => {
                            registry.cleanup_expired();
                        }
                    }
                }
            })
        };

        let session = Self {
            transport: Arc::new(Mutex::new(transport)),
            dispatcher,
            registry,
            contacts,
            dedup: MessageDedupCache::new(config.dedup),
            next_tag: AtomicU32::new(1),
            self_info: Arc::new(std::sync::RwLock::new(None)),
            dispatch_task: Some(dispatch_task),
            config,
        };

        // the handshake gets the long deadline; some devices are slow
        // to wake from light sleep
        let event = session
            .request_with_timeout(
                codec::encode_app_start(&session.config.client_id),
                vec![PacketCode::SelfInfo, PacketCode::Error],
                session.config.remote_timeout,
            )
            .await?;
        if let Event::SelfInfo(info) = event {
            tracing::debug!(name = %info.name, "session established");
            *session
                .self_info
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(*info);
            Ok(session)
        } else {
            Err(Error::Protocol {
                message: "unexpected handshake response".into(),
            })
        }
    }

    /// Connects with default configuration.
    ///
    /// # Errors
    ///
    /// See [`Session::connect`].
    pub async fn connect_with_defaults(transport: T) -> Result<Self> {
        Self::connect(transport, SessionConfig::default()).await
    }

    /// Stops the dispatch task and closes the transport.
    ///
    /// # Errors
    ///
    /// Propagates transport shutdown failures.
    pub async fn disconnect(mut self) -> Result<()> {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.transport.lock().await.disconnect().await
    }

    /// Subscribes to the event broadcast.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.dispatcher.subscribe()
    }

    /// Device information captured during the handshake.
    #[must_use]
    pub fn self_info(&self) -> Option<SelfInfo> {
        self.self_info
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The contact cache backing this session.
    #[must_use]
    pub fn contacts(&self) -> ContactCache {
        self.contacts.clone()
    }

    // ==================== plumbing ====================

    fn next_tag(&self) -> u32 {
        self.next_tag.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, payload: Bytes) -> Result<()> {
        self.transport.lock().await.send(payload).await
    }

    /// Registers before transmitting, then awaits the correlated
    /// reply. A device error completes the registration and surfaces
    /// as `Error::Protocol`.
    async fn request(&self, payload: Bytes, expects: Vec<PacketCode>) -> Result<Event> {
        self.request_with_timeout(payload, expects, self.config.rpc_timeout)
            .await
    }

    async fn request_with_timeout(
        &self,
        payload: Bytes,
        expects: Vec<PacketCode>,
        timeout: Duration,
    ) -> Result<Event> {
        let tag = self.next_tag();
        let reply = self.registry.register(tag, expects, None, timeout);
        if let Err(e) = self.send(payload).await {
            self.registry.cancel(tag);
            return Err(e);
        }
        match reply.wait().await? {
            Event::Error { code } => Err(device_error(code)),
            event => Ok(event),
        }
    }

    async fn request_ok(&self, payload: Bytes) -> Result<()> {
        let event = self
            .request(payload, vec![PacketCode::Ok, PacketCode::Error])
            .await?;
        match event {
            Event::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a set-style command the firmware does not reliably
    /// answer; the pause lets the device process before the next
    /// command lands.
    async fn send_fire_and_forget(&self, payload: Bytes) -> Result<()> {
        self.send(payload).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    /// Registers a prefix-routed wait, sends the triggering command
    /// (which only earns a `MsgSent`), then awaits the mesh reply.
    async fn remote_request(
        &self,
        payload: Bytes,
        destination: &PublicKey,
        kind: BinaryReqKind,
    ) -> Result<Event> {
        let tag = self.next_tag();
        let reply = self.registry.register(
            tag,
            vec![],
            Some((destination.prefix(), kind)),
            self.config.remote_timeout,
        );
        if let Err(e) = self
            .request(payload, vec![PacketCode::MsgSent, PacketCode::Error])
            .await
        {
            self.registry.cancel(tag);
            return Err(e);
        }
        reply.wait().await
    }

    // ==================== device commands ====================

    /// Gets the device clock (Unix seconds).
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn get_time(&self) -> Result<u32> {
        let event = self
            .request(
                codec::encode_get_time(),
                vec![PacketCode::CurrentTime, PacketCode::Error],
            )
            .await?;
        match event {
            Event::CurrentTime(time) => Ok(time),
            other => Err(unexpected(&other)),
        }
    }

    /// Sets the device clock. Fire-and-forget; read back to verify.
    ///
    /// # Errors
    ///
    /// Transport failures only.
    pub async fn set_time(&self, timestamp: u32) -> Result<()> {
        self.send_fire_and_forget(codec::encode_set_time(timestamp))
            .await
    }

    /// Sets the device clock to this host's current time.
    ///
    /// # Errors
    ///
    /// Transport failures only.
    pub async fn sync_time(&self) -> Result<()> {
        self.set_time(unix_now()).await
    }

    /// Gets the battery status.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn get_battery(&self) -> Result<BatteryStatus> {
        let event = self
            .request(
                codec::encode_get_battery(),
                vec![PacketCode::Battery, PacketCode::Error],
            )
            .await?;
        match event {
            Event::Battery(status) => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    /// Queries firmware and hardware information.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn device_query(&self) -> Result<DeviceInfo> {
        let event = self
            .request(
                codec::encode_device_query(),
                vec![PacketCode::DeviceInfo, PacketCode::Error],
            )
            .await?;
        match event {
            Event::DeviceInfo(info) => Ok(*info),
            other => Err(unexpected(&other)),
        }
    }

    /// Broadcasts an advertisement, flooded across the mesh if asked.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn send_advert(&self, flood: bool) -> Result<()> {
        self.request_ok(codec::encode_send_advert(flood)).await
    }

    /// Sets the advertised device name. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for an over-long name.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.send_fire_and_forget(codec::encode_set_name(name)?)
            .await
    }

    /// Sets the advertised coordinates. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for out-of-range coordinates.
    pub async fn set_coords(&self, latitude: f64, longitude: f64) -> Result<()> {
        self.send_fire_and_forget(codec::encode_set_coords(latitude, longitude)?)
            .await
    }

    /// Sets the radio parameters. Fire-and-forget; query back to
    /// verify.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for parameters outside LoRa ranges.
    pub async fn set_radio(&self, config: &RadioConfig) -> Result<()> {
        self.send_fire_and_forget(codec::encode_set_radio(config)?)
            .await
    }

    // ==================== contacts ====================

    /// Syncs the contact list from the device.
    ///
    /// Uses the cache watermark to request only contacts modified
    /// since the last completed sync; records stream into the cache
    /// as they arrive. Returns the full confirmed set.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn sync_contacts(&self) -> Result<Vec<Contact>> {
        let watermark = self.contacts.watermark();
        let since = (watermark > 0).then_some(watermark);
        let event = self
            .request(
                codec::encode_get_contacts(since),
                vec![PacketCode::ContactEnd, PacketCode::Error],
            )
            .await?;
        match event {
            Event::ContactListEnd { last_modified } => {
                self.contacts.sync_completed(last_modified);
                Ok(self.contacts.all())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Adds or updates a contact on the device and in the cache.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn update_contact(&self, contact: &Contact) -> Result<()> {
        self.contacts.stage_pending(contact.clone());
        self.request_ok(codec::encode_update_contact(contact))
            .await?;
        if !self.contacts.confirm(&contact.id()) {
            // already confirmed (update of a known contact)
            self.contacts.upsert(contact.clone());
        }
        Ok(())
    }

    /// Removes a contact from the device and the cache.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn remove_contact(&self, public_key: &PublicKey) -> Result<()> {
        self.request_ok(codec::encode_remove_contact(public_key))
            .await?;
        self.contacts.remove(&public_key.id());
        Ok(())
    }

    /// Resets a contact's routing path back to flood.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn reset_path(&self, public_key: &PublicKey) -> Result<()> {
        self.request_ok(codec::encode_reset_path(public_key)).await
    }

    /// Resolves a cached contact by name.
    ///
    /// # Errors
    ///
    /// `Error::ContactNotFound` when no cached contact matches.
    pub fn contact_by_name(&self, query: &str) -> Result<Contact> {
        self.contacts
            .find_by_name(query)
            .ok_or_else(|| Error::ContactNotFound {
                query: query.into(),
            })
    }

    /// Resolves a cached contact by key prefix.
    ///
    /// # Errors
    ///
    /// `Error::ContactNotFound` when no cached contact matches.
    pub fn contact_by_prefix(&self, prefix: &[u8]) -> Result<Contact> {
        self.contacts
            .find_by_prefix(prefix)
            .ok_or_else(|| Error::ContactNotFound {
                query: hex::encode(prefix),
            })
    }

    // ==================== messaging ====================

    /// Sends a direct text message; returns the receipt carrying the
    /// ACK code to wait on.
    ///
    /// # Errors
    ///
    /// `Error::DataTooLarge` for over-long text, `Error::Timeout` or
    /// `Error::Protocol` on failure.
    pub async fn send_message(
        &self,
        destination: &PublicKey,
        text: &str,
    ) -> Result<MessageReceipt> {
        self.send_typed_message(destination, text, MessageSendType::Direct)
            .await
    }

    /// Sends a CLI command to a remote node (repeater or room server).
    ///
    /// # Errors
    ///
    /// See [`Session::send_message`].
    pub async fn send_cli_command(
        &self,
        destination: &PublicKey,
        command: &str,
    ) -> Result<MessageReceipt> {
        self.send_typed_message(destination, command, MessageSendType::Command)
            .await
    }

    async fn send_typed_message(
        &self,
        destination: &PublicKey,
        text: &str,
        send_type: MessageSendType,
    ) -> Result<MessageReceipt> {
        let payload = codec::encode_send_message(send_type, 0, unix_now(), destination, text)?;
        let event = self
            .request(payload, vec![PacketCode::MsgSent, PacketCode::Error])
            .await?;
        match event {
            Event::MessageSent {
                expected_ack,
                suggested_timeout_ms,
            } => Ok(MessageReceipt {
                expected_ack,
                suggested_timeout: Duration::from_millis(u64::from(suggested_timeout_ms)),
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// Waits for the end-to-end acknowledgment of a sent message.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if no ACK arrives in time.
    pub async fn wait_for_ack(&self, receipt: MessageReceipt) -> Result<Acknowledgment> {
        let timeout = receipt.suggested_timeout.max(Duration::from_millis(1));
        let reply = self
            .registry
            .register(receipt.expected_ack, vec![], None, timeout);
        match reply.wait().await? {
            Event::Ack(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    /// Sends a direct message and waits for its acknowledgment.
    ///
    /// # Errors
    ///
    /// See [`Session::send_message`] and [`Session::wait_for_ack`].
    pub async fn send_message_and_wait(
        &self,
        destination: &PublicKey,
        text: &str,
    ) -> Result<Acknowledgment> {
        let receipt = self.send_message(destination, text).await?;
        self.wait_for_ack(receipt).await
    }

    /// Sends a message to a shared channel.
    ///
    /// # Errors
    ///
    /// `Error::DataTooLarge` for over-long text, `Error::Timeout` or
    /// `Error::Protocol` on failure.
    pub async fn send_channel_message(&self, channel_index: u8, text: &str) -> Result<()> {
        self.request_ok(codec::encode_send_channel_message(
            channel_index,
            unix_now(),
            text,
        )?)
        .await
    }

    /// Drains the device message queue, suppressing duplicates.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn fetch_messages(&self) -> Result<Vec<InboundMessage>> {
        let expects = vec![
            PacketCode::ContactMsgRecv,
            PacketCode::ContactMsgRecvV3,
            PacketCode::ChannelMsgRecv,
            PacketCode::ChannelMsgRecvV3,
            PacketCode::NoMoreMsgs,
            PacketCode::Error,
        ];
        let mut messages = Vec::new();
        loop {
            let event = self
                .request(codec::encode_get_message(), expects.clone())
                .await?;
            match event {
                Event::DirectMessage(msg) => {
                    let id = self
                        .contacts
                        .find_by_prefix(&msg.sender_prefix)
                        .map_or_else(|| hex::encode(msg.sender_prefix), |c| c.id());
                    let fp = fingerprint(msg.timestamp, None, &msg.text);
                    if self.dedup.is_duplicate(&ConversationKey::Direct(id), fp) {
                        tracing::debug!("suppressing duplicate direct message");
                    } else {
                        messages.push(InboundMessage::Direct(*msg));
                    }
                }
                Event::ChannelMessage(msg) => {
                    let key = ConversationKey::Channel(msg.channel_index);
                    let fp = fingerprint(msg.timestamp, None, &msg.text);
                    if self.dedup.is_duplicate(&key, fp) {
                        tracing::debug!("suppressing duplicate channel message");
                    } else {
                        messages.push(InboundMessage::Channel(*msg));
                    }
                }
                Event::NoMoreMessages => return Ok(messages),
                other => return Err(unexpected(&other)),
            }
        }
    }

    // ==================== channels & scope ====================

    /// Reads a channel configuration.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn get_channel(&self, index: u8) -> Result<Channel> {
        let event = self
            .request(
                codec::encode_get_channel(index),
                vec![PacketCode::ChannelInfo, PacketCode::Error],
            )
            .await?;
        match event {
            Event::ChannelInfo(channel) => Ok(*channel),
            other => Err(unexpected(&other)),
        }
    }

    /// Writes a channel configuration. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for an over-long name.
    pub async fn set_channel(&self, index: u8, name: &str, secret: &[u8; 16]) -> Result<()> {
        self.send_fire_and_forget(codec::encode_set_channel(index, name, secret)?)
            .await
    }

    /// Limits flood routing to a 16-byte scope key.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn set_flood_scope(&self, scope_key: &[u8; 16]) -> Result<()> {
        self.request_ok(codec::encode_set_flood_scope(scope_key))
            .await
    }

    /// Limits flood routing to a named topic.
    ///
    /// # Errors
    ///
    /// See [`Session::set_flood_scope`].
    pub async fn set_flood_scope_topic(&self, topic: &str) -> Result<()> {
        self.set_flood_scope(&crate::crypto::keys::derive_flood_scope_key(topic))
            .await
    }

    /// Clears flood scoping.
    ///
    /// # Errors
    ///
    /// See [`Session::set_flood_scope`].
    pub async fn clear_flood_scope(&self) -> Result<()> {
        self.set_flood_scope(&crate::crypto::keys::DISABLED_FLOOD_SCOPE)
            .await
    }

    // ==================== remote nodes ====================

    /// Logs in to a room server.
    ///
    /// The device answers with `MsgSent`; the verdict arrives later as
    /// a push once the server responds.
    ///
    /// # Errors
    ///
    /// `Error::Protocol` when the server rejects the login,
    /// `Error::Timeout` when no verdict arrives.
    pub async fn login(&self, destination: &PublicKey, password: &str) -> Result<()> {
        // subscribe before sending so the verdict cannot be missed
        let mut subscription = self.dispatcher.subscribe();
        self.request(
            codec::encode_send_login(destination, password),
            vec![PacketCode::MsgSent, PacketCode::Error],
        )
        .await?;

        let timeout = self.config.remote_timeout;
        let verdict = tokio::time::timeout(timeout, async {
            loop {
                match subscription.recv().await {
                    Some(Event::LoginSuccess) => return Some(true),
                    Some(Event::LoginFailed) => return Some(false),
                    Some(_) => {}
                    None => return None,
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?;

        match verdict {
            Some(true) => Ok(()),
            Some(false) => Err(Error::Protocol {
                message: "login rejected".into(),
            }),
            None => Err(Error::ConnectionLost),
        }
    }

    /// Logs out from a room server.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn logout(&self, destination: &PublicKey) -> Result<()> {
        self.request_ok(codec::encode_send_logout(destination))
            .await
    }

    /// Requests a status report from a remote node and waits for it.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` when the node does not answer.
    pub async fn remote_status(&self, destination: &PublicKey) -> Result<RemoteStatus> {
        let event = self
            .remote_request(
                codec::encode_send_status_request(destination),
                destination,
                BinaryReqKind::Status,
            )
            .await?;
        match event {
            Event::StatusResponse(status) => Ok(*status),
            other => Err(unexpected(&other)),
        }
    }

    /// Requests telemetry from a remote node and waits for it.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` when the node does not answer.
    pub async fn remote_telemetry(&self, destination: &PublicKey) -> Result<Telemetry> {
        let event = self
            .remote_request(
                codec::encode_telemetry_request(destination),
                destination,
                BinaryReqKind::Telemetry,
            )
            .await?;
        match event {
            Event::TelemetryResponse { telemetry, .. } => Ok(telemetry),
            other => Err(unexpected(&other)),
        }
    }

    /// Pings a remote node without expecting a reply frame.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn keep_alive(&self, destination: &PublicKey) -> Result<()> {
        self.request(
            codec::encode_binary_request(destination, BinaryReqKind::KeepAlive, &[]),
            vec![PacketCode::MsgSent, PacketCode::Error],
        )
        .await?;
        Ok(())
    }

    /// Reads the device's own telemetry.
    ///
    /// The reply comes back as a telemetry push carrying our own key
    /// prefix, with no `MsgSent` in between.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` or `Error::Protocol` on failure.
    pub async fn self_telemetry(&self) -> Result<Telemetry> {
        let own_key = self
            .self_info()
            .map(|info| info.public_key)
            .ok_or(Error::NotConnected)?;
        let tag = self.next_tag();
        let reply = self.registry.register(
            tag,
            vec![],
            Some((own_key.prefix(), BinaryReqKind::Telemetry)),
            self.config.rpc_timeout,
        );
        if let Err(e) = self.send(codec::encode_self_telemetry()).await {
            self.registry.cancel(tag);
            return Err(e);
        }
        match reply.wait().await? {
            Event::TelemetryResponse { telemetry, .. } => Ok(telemetry),
            other => Err(unexpected(&other)),
        }
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
    }
}

/// Decodes one frame and routes it: completions first, broadcast for
/// whatever nothing was waiting on.
fn dispatch_frame(
    payload: &[u8],
    registry: &RequestRegistry,
    dispatcher: &EventDispatcher,
    contacts: &ContactCache,
) {
    match codec::decode(payload) {
        Decoded::Unrecognized { first_byte, data } => {
            tracing::warn!(?first_byte, len = data.len(), "unrecognized frame, ignoring");
        }
        Decoded::Response { code, event } => {
            if let Event::Contact(contact) = &event {
                contacts.upsert((**contact).clone());
            }
            if !registry.complete_response(code, event.clone()) {
                dispatcher.dispatch(event);
            }
        }
        Decoded::Push { code, event } => {
            let completed = match &event {
                // the ACK code is only learned from MsgSent, so the
                // ACK itself may arrive before anyone waits on it
                Event::Ack(ack) => registry.complete_or_stash(ack.code, event.clone()),
                Event::StatusResponse(status) => registry.complete_binary(
                    status.pubkey_prefix,
                    BinaryReqKind::Status,
                    event.clone(),
                ),
                Event::TelemetryResponse { pubkey_prefix, .. } => registry.complete_binary(
                    *pubkey_prefix,
                    BinaryReqKind::Telemetry,
                    event.clone(),
                ),
                Event::BinaryResponse {
                    pubkey_prefix,
                    kind: Some(kind),
                    ..
                } => registry.complete_binary(*pubkey_prefix, *kind, event.clone()),
                Event::NewContactAdvert(contact) => {
                    contacts.upsert((**contact).clone());
                    false
                }
                // the push names the contact but not its new path;
                // only a sync can refresh the record
                Event::PathUpdate(_) => {
                    contacts.mark_dirty();
                    false
                }
                _ => false,
            };
            if !completed {
                tracing::trace!(?code, "broadcasting push");
                dispatcher.dispatch(event);
            }
        }
    }
}

/// Parses a 64-character hex string into a public key.
///
/// # Errors
///
/// `Error::InvalidPublicKey` for malformed hex or a wrong length.
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey> {
    PublicKey::from_hex(hex_key).map_err(|e| Error::InvalidPublicKey {
        reason: e.to_string(),
    })
}

fn device_error(code: Option<u8>) -> Error {
    Error::Protocol {
        message: code.map_or_else(
            || "device reported an error".into(),
            |c| format!("device reported error code {c}"),
        ),
    }
}

fn unexpected(event: &Event) -> Error {
    Error::Protocol {
        message: format!("unexpected response: {event:?}"),
    }
}

/// Current Unix time, saturating at the u32 horizon.
fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{self, FrameDecoder};
    use crate::transport::StreamTransport;
    use crate::types::contact::ContactType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Scripted device on the far side of a duplex pipe.
    struct Peer {
        stream: DuplexStream,
        decoder: FrameDecoder,
    }

    impl Peer {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream,
                decoder: FrameDecoder::new(),
            }
        }

        async fn read_command(&mut self) -> Vec<u8> {
            loop {
                if let Some(payload) = self.decoder.next_frame() {
                    return payload.to_vec();
                }
                let mut buf = [0u8; 256];
                let n = self.stream.read(&mut buf).await.expect("peer read");
                assert!(n > 0, "session closed the stream");
                self.decoder.feed(&buf[..n]);
            }
        }

        async fn send_payload(&mut self, payload: &[u8]) {
            let framed = frame::encode(payload).expect("frame");
            self.stream.write_all(&framed).await.expect("peer write");
        }
    }

    fn self_info_payload(name: &str) -> Vec<u8> {
        let mut p = vec![0x05]; // SelfInfo code
        p.push(1); // advert_type
        p.push(20); // tx_power
        p.push(22); // max_tx_power
        p.extend_from_slice(&[0xA7; 32]); // public key
        p.extend_from_slice(&0i32.to_le_bytes()); // lat
        p.extend_from_slice(&0i32.to_le_bytes()); // lon
        p.extend_from_slice(&[0, 0, 0, 0]); // policy bytes
        p.extend_from_slice(&868_000u32.to_le_bytes()); // freq kHz
        p.extend_from_slice(&125_000u32.to_le_bytes()); // bw Hz
        p.push(7); // sf
        p.push(5); // cr
        p.extend_from_slice(name.as_bytes());
        p
    }

    fn contact_payload(first_byte: u8, name: &str, last_modified: u32) -> Vec<u8> {
        let mut p = vec![0x03]; // Contact code
        let mut key = [0u8; 32];
        key[0] = first_byte;
        p.extend_from_slice(&key);
        p.push(1); // chat
        p.push(0); // flags
        p.push(0xFF); // path_len -1 (flood)
        p.extend_from_slice(&[0u8; 64]); // path
        let mut name_field = [0u8; 32];
        name_field[..name.len()].copy_from_slice(name.as_bytes());
        p.extend_from_slice(&name_field);
        p.extend_from_slice(&10u32.to_le_bytes()); // last_advert
        p.extend_from_slice(&0i32.to_le_bytes()); // lat
        p.extend_from_slice(&0i32.to_le_bytes()); // lon
        p.extend_from_slice(&last_modified.to_le_bytes());
        p
    }

    fn direct_message_payload(timestamp: u32, text: &str) -> Vec<u8> {
        let mut p = vec![0x07]; // ContactMsgRecv
        p.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        p.push(0); // path_len
        p.push(0); // plain text
        p.extend_from_slice(&timestamp.to_le_bytes());
        p.extend_from_slice(text.as_bytes());
        p
    }

    async fn connected_session() -> (Session<StreamTransport<DuplexStream>>, Peer) {
        let (local, remote) = tokio::io::duplex(4096);
        let mut peer = Peer::new(remote);

        let handshake = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd[0], 0x01); // AppStart
            peer.send_payload(&self_info_payload("test-node")).await;
            peer
        });

        let session = Session::connect_with_defaults(StreamTransport::new(local))
            .await
            .expect("connect");
        let peer = handshake.await.expect("handshake task");
        (session, peer)
    }

    #[tokio::test]
    async fn handshake_captures_self_info() {
        let (session, _peer) = connected_session().await;
        let info = session.self_info().expect("self info");
        assert_eq!(info.name, "test-node");
        assert_eq!(info.public_key.as_bytes(), &[0xA7; 32]);
        assert!((info.radio.frequency_mhz - 868.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_time_round_trip() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd, vec![0x05]); // GetTime
            let mut reply = vec![0x09];
            reply.extend_from_slice(&1_700_000_000u32.to_le_bytes());
            peer.send_payload(&reply).await;
        });

        assert_eq!(session.get_time().await.unwrap(), 1_700_000_000);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn device_error_surfaces_as_protocol_error() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            let _ = peer.read_command().await;
            peer.send_payload(&[0x01, 0x02]).await; // Error, code 2
        });

        assert!(matches!(
            session.get_battery().await,
            Err(Error::Protocol { .. })
        ));
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (local, remote) = tokio::io::duplex(4096);
        let mut peer = Peer::new(remote);

        let handshake = tokio::spawn(async move {
            let _ = peer.read_command().await;
            peer.send_payload(&self_info_payload("mute")).await;
            peer // keep the stream alive, answer nothing further
        });

        let config = SessionConfig::default().rpc_timeout(Duration::from_millis(50));
        let session = Session::connect(StreamTransport::new(local), config)
            .await
            .unwrap();
        let _peer = handshake.await.unwrap();

        assert!(matches!(
            session.get_time().await,
            Err(Error::Timeout { timeout_ms: 50 })
        ));
    }

    #[tokio::test]
    async fn message_send_and_ack() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd[0], 0x02); // SendMessage
            assert_eq!(cmd[1], 0x00); // direct

            let mut sent = vec![0x06, 0x00];
            sent.extend_from_slice(&7777u32.to_le_bytes()); // ack code
            sent.extend_from_slice(&5000u32.to_le_bytes()); // est timeout
            peer.send_payload(&sent).await;

            let mut ack = vec![0x82];
            ack.extend_from_slice(&7777u32.to_le_bytes());
            peer.send_payload(&ack).await;
        });

        let dest = PublicKey::new([9u8; 32]);
        let ack = session.send_message_and_wait(&dest, "hello").await.unwrap();
        assert_eq!(ack.code, 7777);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn contact_sync_fills_cache_and_watermark() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd, vec![0x04]); // no watermark on first sync

            let mut start = vec![0x02];
            start.extend_from_slice(&2u32.to_le_bytes());
            peer.send_payload(&start).await;
            peer.send_payload(&contact_payload(0x11, "alice", 500)).await;
            peer.send_payload(&contact_payload(0x22, "bob", 900)).await;
            let mut end = vec![0x04];
            end.extend_from_slice(&900u32.to_le_bytes());
            peer.send_payload(&end).await;

            // second sync carries the watermark
            let cmd = peer.read_command().await;
            assert_eq!(cmd[0], 0x04);
            assert_eq!(u32::from_le_bytes([cmd[1], cmd[2], cmd[3], cmd[4]]), 900);
            let mut end = vec![0x04];
            end.extend_from_slice(&900u32.to_le_bytes());
            peer.send_payload(&end).await;
        });

        let contacts = session.sync_contacts().await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert!(!session.contacts().is_dirty());
        assert_eq!(session.contacts().watermark(), 900);

        let alice = session.contact_by_name("alice").unwrap();
        assert_eq!(alice.contact_type, ContactType::Chat);
        assert!(alice.is_flood());

        session.sync_contacts().await.unwrap();
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn fetch_messages_suppresses_duplicates() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            for _ in 0..3 {
                let cmd = peer.read_command().await;
                assert_eq!(cmd, vec![0x0A]); // GetMessage
                peer.send_payload(&direct_message_payload(1000, "flooded")).await;
            }
            let cmd = peer.read_command().await;
            assert_eq!(cmd, vec![0x0A]);
            peer.send_payload(&[0x0A]).await; // NoMoreMsgs
        });

        let messages = session.fetch_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            InboundMessage::Direct(msg) => assert_eq!(msg.text, "flooded"),
            InboundMessage::Channel(_) => panic!("wrong kind"),
        }
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn remote_status_routes_by_prefix() {
        let (session, mut peer) = connected_session().await;
        let dest = PublicKey::new([0x42; 32]);

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd[0], 0x1B); // SendStatusReq

            let mut sent = vec![0x06, 0x00];
            sent.extend_from_slice(&1u32.to_le_bytes());
            sent.extend_from_slice(&100u32.to_le_bytes());
            peer.send_payload(&sent).await;

            let mut status = vec![0x87, 0x00]; // push + reserved
            status.extend_from_slice(&[0x42; 6]); // prefix
            status.extend_from_slice(&4100u16.to_le_bytes()); // battery
            status.extend_from_slice(&1u16.to_le_bytes()); // tx queue
            status.extend_from_slice(&(-95i16).to_le_bytes()); // noise
            status.extend_from_slice(&(-70i16).to_le_bytes()); // rssi
            status.extend_from_slice(&100u32.to_le_bytes()); // recv
            status.extend_from_slice(&80u32.to_le_bytes()); // sent
            status.extend_from_slice(&0u32.to_le_bytes()); // airtime
            status.extend_from_slice(&3600u32.to_le_bytes()); // uptime
            status.extend_from_slice(&[0u8; 16]); // route counters
            status.extend_from_slice(&0u16.to_le_bytes()); // full events
            status.extend_from_slice(&40i16.to_le_bytes()); // snr*4
            status.extend_from_slice(&[0u8; 8]); // dups + rx airtime
            peer.send_payload(&status).await;
        });

        let status = session.remote_status(&dest).await.unwrap();
        assert_eq!(status.pubkey_prefix, [0x42; 6]);
        assert_eq!(status.battery_mv, 4100);
        assert_eq!(status.uptime_secs, 3600);
        assert!((status.last_snr - 10.0).abs() < 0.01);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn unsolicited_events_reach_subscribers() {
        let (session, mut peer) = connected_session().await;
        let mut events = session.subscribe();

        peer.send_payload(&[0x83]).await; // MessagesWaiting
        let mut advert = vec![0x80];
        advert.extend_from_slice(&[0x55; 32]);
        peer.send_payload(&advert).await;

        assert!(matches!(events.recv().await, Some(Event::MessagesWaiting)));
        match events.recv().await {
            Some(Event::Advertisement(key)) => assert_eq!(key.as_bytes(), &[0x55; 32]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn public_key_parsing_rejects_bad_input() {
        assert!(matches!(
            parse_public_key("zz"),
            Err(Error::InvalidPublicKey { .. })
        ));
        assert!(matches!(
            parse_public_key(&"ab".repeat(16)),
            Err(Error::InvalidPublicKey { .. })
        ));
        let key = parse_public_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xAB; 32]);
    }

    #[tokio::test]
    async fn path_update_push_marks_contacts_dirty() {
        let (session, mut peer) = connected_session().await;

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read_command().await;
            assert_eq!(cmd, vec![0x04]);
            let mut end = vec![0x04];
            end.extend_from_slice(&100u32.to_le_bytes());
            peer.send_payload(&end).await;
            peer
        });

        session.sync_contacts().await.unwrap();
        assert!(!session.contacts().is_dirty());
        let mut peer = peer_task.await.unwrap();

        let mut events = session.subscribe();
        let mut update = vec![0x81];
        update.extend_from_slice(&[0x66; 32]);
        peer.send_payload(&update).await;

        // the push still reaches subscribers, and the cache knows the
        // device holds a newer record than we do
        assert!(matches!(events.recv().await, Some(Event::PathUpdate(_))));
        assert!(session.contacts().is_dirty());
    }

    #[tokio::test]
    async fn stream_close_broadcasts_disconnect() {
        let (session, peer) = connected_session().await;
        let mut events = session.subscribe();

        drop(peer);
        assert!(matches!(events.recv().await, Some(Event::Disconnected)));
    }

    #[tokio::test]
    async fn garbled_frame_does_not_wedge_the_session() {
        let (session, mut peer) = connected_session().await;

        peer.send_payload(&[0xFE, 0xFF, 0x00]).await; // unknown code

        let peer_task = tokio::spawn(async move {
            let _ = peer.read_command().await;
            let mut reply = vec![0x09];
            reply.extend_from_slice(&77u32.to_le_bytes());
            peer.send_payload(&reply).await;
        });

        assert_eq!(session.get_time().await.unwrap(), 77);
        peer_task.await.unwrap();
    }
}
