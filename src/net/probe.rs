use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::ConnectivityConfig;
use crate::net::monitor::{NetworkBackend, NetworkEvent, NetworkId, Registration};

/// Reachability backend that treats every probe target as one network.
///
/// A target counts as available while a TCP connect to it succeeds within
/// the probe timeout. Every tick reports each target, then `Settled`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
  targets: Vec<String>,
  interval: Duration,
  timeout: Duration,
}

impl TcpProbe {
  pub fn new(targets: Vec<String>, interval: Duration, timeout: Duration) -> Self {
    Self {
      targets,
      interval,
      timeout,
    }
  }

  pub fn from_config(config: &ConnectivityConfig) -> Self {
    Self::new(
      config.probe_targets.clone(),
      config.probe_interval(),
      config.probe_timeout(),
    )
  }
}

fn resolve(target: &str) -> Vec<SocketAddr> {
  match target.to_socket_addrs() {
    Ok(addrs) => addrs.collect(),
    Err(e) => {
      trace!(target, error = %e, "Probe target did not resolve");
      Vec::new()
    }
  }
}

async fn probe(target: &str, timeout: Duration) -> bool {
  matches!(
    tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await,
    Ok(Ok(_))
  )
}

impl NetworkBackend for TcpProbe {
  fn is_reachable(&self) -> bool {
    self.targets.iter().any(|target| {
      resolve(target)
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, self.timeout).is_ok())
    })
  }

  fn register(&self, events: mpsc::UnboundedSender<NetworkEvent>) -> Registration {
    let targets = self.targets.clone();
    let timeout = self.timeout;
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let task = tokio::spawn(async move {
      loop {
        ticker.tick().await;
        for (index, target) in targets.iter().enumerate() {
          let id = NetworkId(index as u64);
          let event = if probe(target, timeout).await {
            NetworkEvent::Available(id)
          } else {
            NetworkEvent::Lost(id)
          };
          trace!(target = %target, ?event, "Probe result");
          if events.send(event).is_err() {
            debug!("Probe receiver gone, stopping");
            return;
          }
        }
        if events.send(NetworkEvent::Settled).is_err() {
          return;
        }
      }
    });

    Registration::abort_on_drop(task)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  #[test]
  fn test_unresolvable_target_is_unreachable() {
    let probe = TcpProbe::new(
      vec!["not a host".to_string()],
      Duration::from_secs(1),
      Duration::from_millis(100),
    );
    assert!(!probe.is_reachable());
  }

  #[test]
  fn test_no_targets_is_unreachable() {
    let probe = TcpProbe::new(Vec::new(), Duration::from_secs(1), Duration::from_millis(100));
    assert!(!probe.is_reachable());
  }

  #[tokio::test]
  async fn test_reports_listening_and_closed_targets() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().to_string();

    // bind then drop to get a port nobody listens on
    let closed = {
      let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
      l.local_addr().unwrap().to_string()
    };

    let probe = TcpProbe::new(
      vec![open.clone(), closed],
      Duration::from_secs(60),
      Duration::from_millis(500),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let registration = probe.register(tx);

    assert_eq!(rx.recv().await, Some(NetworkEvent::Available(NetworkId(0))));
    assert_eq!(rx.recv().await, Some(NetworkEvent::Lost(NetworkId(1))));
    assert_eq!(rx.recv().await, Some(NetworkEvent::Settled));

    drop(registration);
    // task aborted: the sender is dropped with it
    assert_eq!(rx.recv().await, None);

    let open_only = TcpProbe::new(vec![open], Duration::from_secs(60), Duration::from_millis(500));
    assert!(tokio::task::spawn_blocking(move || open_only.is_reachable())
      .await
      .unwrap());
  }
}
