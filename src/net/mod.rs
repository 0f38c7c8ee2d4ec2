//! Network reachability: the monitor consumed by the orchestrator and the
//! TCP probe backend that feeds it.

pub mod monitor;
pub mod probe;

pub use monitor::{
  Connectivity, ConnectivityMonitor, ConnectivityState, ConnectivityStream, NetworkBackend,
  NetworkEvent, NetworkId, Registration,
};
pub use probe::TcpProbe;
