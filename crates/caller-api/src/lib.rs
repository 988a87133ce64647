// caller-api: wire layer for the clinic calling station (MQTT broker + triage backend)

pub mod backend;
pub mod broker;
pub mod error;
pub mod mqtt;
pub mod transport;

pub use backend::{Endpoint, HttpBackend, OrgHeaders, RpcBackend};
pub use broker::{
    BrokerConnector, BrokerEndpoint, BrokerEvent, BrokerLink, BrokerTransport, ConnectOptions,
    InboundMessage, QoS,
};
pub use error::Error;
pub use mqtt::MqttConnector;
pub use transport::{TlsMode, TransportConfig};
