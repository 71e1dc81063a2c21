//! MQTT sink.
//!
//! The broker connection is established eagerly in [`MqttSink::connect`]; a
//! broker that does not answer with a successful CONNACK is a startup error.
//! After that the event loop runs on a local task until the sink is closed or
//! the connection drops. There is no reconnect: once the event loop has
//! stopped, the next emit or the final close reports the connection error.
//!
//! Readings are published with QoS 1 and [`Sink::close`] waits for the broker
//! to acknowledge every publish before disconnecting, so a run only succeeds
//! when the broker has accepted all of its readings.

use super::{EmitError, Sink, SinkFuture, echo_label, to_json};
use crate::reading::ReadingSet;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Keep-alive interval announced to the broker.
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the request channel between the client and its event loop.
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Largest MQTT packet sent or accepted. Wide logger tables produce payloads
/// well past the client library's 10 KiB default.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

/// Fixed header (up to 5 bytes), topic length prefix and packet identifier.
const PUBLISH_OVERHEAD: usize = 5 + 2 + 2;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "cr1000-relay";

/// Broker address and publish target.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    /// Upper bound for a PUBLISH packet, topic and header included
    pub max_packet_size: usize,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, topic: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            topic: topic.into(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Errors raised while connecting to the broker.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("could not connect to MQTT broker at {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: ConnectionError,
    },
    #[error("MQTT broker at {host}:{port} refused the connection: {code:?}")]
    Refused {
        host: String,
        port: u16,
        code: ConnectReturnCode,
    },
}

type EventLoopTask = JoinHandle<Result<(), ConnectionError>>;

/// Publishes each reading set as a JSON payload to one topic.
pub struct MqttSink {
    client: AsyncClient,
    topic: String,
    max_packet_size: usize,
    silent: bool,
    published: u64,
    acked: watch::Receiver<u64>,
    event_loop: Option<EventLoopTask>,
}

impl MqttSink {
    /// Connect to the broker and wait for its CONNACK.
    ///
    /// # Arguments
    /// * `settings` - Broker address, client id, topic and packet size limit
    /// * `silent` - Suppress the per-record progress echo
    ///
    /// # Returns
    /// A connected sink whose event loop is running on a spawned task.
    ///
    /// # Errors
    /// Returns `ConnectError` if the broker cannot be reached or does not
    /// accept the connection. Nothing is retried.
    pub async fn connect(settings: &MqttSettings, silent: bool) -> Result<Self, ConnectError> {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_max_packet_size(settings.max_packet_size, settings.max_packet_size);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        wait_for_connack(&mut event_loop, settings).await?;
        debug!(host = %settings.host, port = settings.port, "connected to MQTT broker");

        let (acked_tx, acked) = watch::channel(0);
        Ok(Self {
            client,
            topic: settings.topic.clone(),
            max_packet_size: settings.max_packet_size,
            silent,
            published: 0,
            acked,
            event_loop: Some(tokio::spawn(drive(event_loop, acked_tx))),
        })
    }

    /// Fail if the event loop has already stopped.
    async fn check_event_loop(&mut self) -> Result<(), EmitError> {
        match self.event_loop.take_if(|task| task.is_finished()) {
            Some(task) => match join(task).await {
                Ok(()) => Err(EmitError::Disconnected),
                Err(error) => Err(error),
            },
            None if self.event_loop.is_none() => Err(EmitError::Disconnected),
            None => Ok(()),
        }
    }

    async fn publish(&mut self, readings: &ReadingSet) -> Result<(), EmitError> {
        self.check_event_loop().await?;

        let payload = to_json(readings)?;
        let size = PUBLISH_OVERHEAD + self.topic.len() + payload.len();
        if size > self.max_packet_size {
            return Err(EmitError::PayloadTooLarge {
                size,
                limit: self.max_packet_size,
            });
        }

        if !self.silent {
            info!("Pushing readings to MQTT...{}", echo_label(readings));
        }
        self.client
            .publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await?;
        self.published += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), EmitError> {
        let Some(task) = self.event_loop.take() else {
            return Ok(());
        };

        let published = self.published;
        // Errors once the event loop has stopped and dropped its sender.
        let delivered = self.acked.wait_for(|acked| *acked >= published).await.is_ok();
        if !delivered {
            join(task).await?;
            return Err(EmitError::Unacknowledged {
                published,
                acked: *self.acked.borrow(),
            });
        }

        if let Err(error) = self.client.disconnect().await {
            debug!(%error, "MQTT disconnect request not delivered");
        }
        join(task).await
    }
}

/// Wait for the event loop task and flatten its outcome.
async fn join(task: EventLoopTask) -> Result<(), EmitError> {
    match task.await {
        Ok(result) => Ok(result?),
        Err(error) => {
            debug!(%error, "MQTT event loop task failed");
            Err(EmitError::Disconnected)
        }
    }
}

async fn wait_for_connack(
    event_loop: &mut EventLoop,
    settings: &MqttSettings,
) -> Result<(), ConnectError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ConnectError::Refused {
                        host: settings.host.clone(),
                        port: settings.port,
                        code,
                    }),
                };
            }
            Ok(event) => trace!(?event, "waiting for CONNACK"),
            Err(source) => {
                return Err(ConnectError::Connection {
                    host: settings.host.clone(),
                    port: settings.port,
                    source,
                });
            }
        }
    }
}

/// Poll the event loop until we disconnect or the connection fails,
/// counting PUBACKs as they arrive.
async fn drive(
    mut event_loop: EventLoop,
    acked: watch::Sender<u64>,
) -> Result<(), ConnectionError> {
    loop {
        match event_loop.poll().await? {
            Event::Incoming(Packet::PubAck(_)) => acked.send_modify(|n| *n += 1),
            Event::Outgoing(Outgoing::Disconnect) => return Ok(()),
            event => trace!(?event, "MQTT event"),
        }
    }
}

impl Sink for MqttSink {
    fn emit<'a>(&'a mut self, readings: &'a ReadingSet) -> SinkFuture<'a> {
        Box::pin(self.publish(readings))
    }

    fn close(&mut self) -> SinkFuture<'_> {
        Box::pin(self.disconnect())
    }
}
