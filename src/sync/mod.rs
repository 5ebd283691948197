pub mod coordinator;
pub mod transport;
pub mod trusted_network;

pub use coordinator::{CollectionOutcome, SyncCoordinator, SyncOutcome, SyncReport};
pub use transport::{HttpTransport, Transport, TransportError};
pub use trusted_network::{
    normalize_network_id, LogNotifier, NetworkIdentity, Notifier, ReportedNetwork,
    TrustedNetworkTrigger,
};
