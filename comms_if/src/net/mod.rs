//! # Network Module
//!
//! This module provides the abstraction over MQTT, the message bus chosen for
//! the software.
//!
//! A [`BusClient`] owns a synchronous MQTT client plus a background pump
//! thread which drives the connection, forwards incoming publishes to the
//! owning task through a bounded channel, and keeps the client subscribed
//! across broker reconnections. Tasks only ever see [`BusMessage`] values and
//! a connected flag; the MQTT machinery stays in here.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::Deserialize;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet};

// Export rumqttc so users can name QoS levels without a separate dependency
pub use rumqttc;
pub use rumqttc::QoS;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters describing how to reach and drive the message bus.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Hostname of the broker. May be overridden by the `BROKER_HOST`
    /// environment variable at startup.
    pub broker_host: String,

    /// Port of the broker.
    pub broker_port: u16,

    /// MQTT keep alive interval in seconds.
    pub keep_alive_s: u64,

    /// Capacity of the client's outgoing request queue.
    pub request_channel_capacity: usize,

    /// Capacity of the incoming message channel between the pump thread and
    /// the owning task.
    pub incoming_channel_capacity: usize,

    /// Number of consecutive failed connection attempts after which a
    /// blocking first connect gives up.
    pub connect_retry_budget: u32,

    /// Delay between reconnection attempts in milliseconds.
    pub reconnect_delay_ms: u64,
}

/// A message received from the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// A bus client which is monitored by a background pump thread.
///
/// The pump thread drives the MQTT event loop: it raises the `connected`
/// flag on acknowledgement, forwards incoming publishes into the bounded
/// incoming channel, re-issues recorded subscriptions when the broker
/// accepts a fresh session, and counts consecutive connection failures so
/// that a blocking first connect can give up on an unreachable broker.
pub struct BusClient {
    client: Client,

    incoming_rx: Receiver<BusMessage>,

    connected: Arc<AtomicBool>,

    shutdown: Arc<AtomicBool>,

    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,

    join_handle: Option<thread::JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Could not connect to the broker within the retry budget ({0} attempts)")]
    CouldNotConnect(u32),

    #[error("Could not send the message to the bus: {0}")]
    SendError(rumqttc::ClientError),

    #[error("Could not subscribe to the topic: {0}")]
    SubscribeError(rumqttc::ClientError),

    #[error("The bus connection has been torn down")]
    ConnectionClosed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BusClient {
    /// Create a new client connected to the broker described by `params`.
    ///
    /// If `block_on_first_connect` is set this function will not return until
    /// the broker has acknowledged the connection, or until
    /// `params.connect_retry_budget` consecutive attempts have failed, in
    /// which case a [`BusError::CouldNotConnect`] error is returned.
    /// Reconnection after a successful first connect is handled by the pump
    /// thread and never surfaces as an error here.
    pub fn connect(
        params: &NetParams,
        client_id: &str,
        block_on_first_connect: bool,
    ) -> Result<Self, BusError> {
        let mut options = MqttOptions::new(client_id, &params.broker_host, params.broker_port);
        options.set_keep_alive(Duration::from_secs(params.keep_alive_s));
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, params.request_channel_capacity);

        // Create atomics and the incoming channel
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let consec_failures = Arc::new(AtomicU32::new(0));
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let (incoming_tx, incoming_rx) = sync_channel(params.incoming_channel_capacity);

        // Spawn the pump thread
        let join_handle = {
            let client = client.clone();
            let connected = connected.clone();
            let shutdown = shutdown.clone();
            let consec_failures = consec_failures.clone();
            let subscriptions = subscriptions.clone();
            let reconnect_delay = Duration::from_millis(params.reconnect_delay_ms);

            match thread::Builder::new()
                .name(format!("bus_pump_{}", client_id))
                .spawn(move || {
                    pump(
                        connection,
                        client,
                        incoming_tx,
                        connected,
                        shutdown,
                        consec_failures,
                        subscriptions,
                        reconnect_delay,
                    )
                }) {
                Ok(handle) => handle,
                Err(e) => util::raise_error!("Cannot spawn the bus pump thread: {}", e),
            }
        };

        // If requested wait for the first connection acknowledgement
        if block_on_first_connect {
            loop {
                if connected.load(Ordering::Relaxed) {
                    break;
                }

                let attempts = consec_failures.load(Ordering::Relaxed);
                if attempts >= params.connect_retry_budget {
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(BusError::CouldNotConnect(attempts));
                }

                thread::sleep(Duration::from_millis(50));
            }
        }

        Ok(Self {
            client,
            incoming_rx,
            connected,
            shutdown,
            subscriptions,
            join_handle: Some(join_handle),
        })
    }

    /// Return if the client is connected to the broker or not.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Subscribe to a topic.
    ///
    /// The subscription is recorded so the pump thread can re-issue it after
    /// a broker reconnection.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError> {
        util::lock_witness::assert_none_held("Bus subscribe");

        self.subscriptions
            .lock()
            .expect("Subscription list lock poisoned")
            .push((topic.to_string(), qos));

        self.client
            .subscribe(topic, qos)
            .map_err(BusError::SubscribeError)
    }

    /// Publish a payload to a topic.
    ///
    /// The message is queued on the client's request channel; a full queue
    /// (for instance while the broker is unreachable) is reported as a
    /// [`BusError::SendError`] and the frame is dropped by the caller, it is
    /// never buffered.
    pub fn publish<P: Into<Vec<u8>>>(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: P,
    ) -> Result<(), BusError> {
        util::lock_witness::assert_none_held("Bus publish");

        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(BusError::SendError)
    }

    /// Receive the next message from the bus, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if no message arrived within the timeout. An error
    /// is only returned when the pump thread has terminated, which is a
    /// terminal condition for the owning task.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        match self.incoming_rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::ConnectionClosed),
        }
    }

    /// Disconnect from the broker and stop the pump thread.
    pub fn disconnect(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.client.disconnect().ok();
        debug!("Bus client disconnect requested");
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.client.disconnect().ok();

        // The pump may be parked inside the MQTT event loop, so joining here
        // can hang on an unreachable broker. Like the rest of the shutdown
        // path the thread is signalled and left to exit on its own.
        let _ = self.join_handle.take();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Drive the MQTT event loop until shutdown.
fn pump(
    mut connection: Connection,
    client: Client,
    incoming_tx: SyncSender<BusMessage>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    consec_failures: Arc<AtomicU32>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    reconnect_delay: Duration,
) {
    for event in connection.iter() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.store(true, Ordering::Relaxed);
                consec_failures.store(0, Ordering::Relaxed);

                // A fresh session has lost our subscriptions, restore them
                if !ack.session_present {
                    let subs = subscriptions
                        .lock()
                        .expect("Subscription list lock poisoned")
                        .clone();
                    for (topic, qos) in subs {
                        if let Err(e) = client.try_subscribe(topic.clone(), qos) {
                            warn!("Could not restore subscription to {}: {}", topic, e);
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = BusMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };

                // Drop the frame rather than stall the event loop if the
                // owning task has fallen behind; a closed channel means the
                // owner is gone and the pump can stop.
                match incoming_tx.try_send(msg) {
                    Ok(()) => (),
                    Err(TrySendError::Full(_)) => {
                        warn!("Incoming bus channel full, dropping a frame from {}", publish.topic)
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
            }
            Ok(_) => (),
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("Bus connection lost: {}", e);
                }
                consec_failures.fetch_add(1, Ordering::Relaxed);

                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                thread::sleep(reconnect_delay);
            }
        }
    }
}
