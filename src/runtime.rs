//! Wires every component together: one serial channel + poller thread pair
//! per distinct UART port referenced by the config, a snapshot store, a TCP
//! slave engine thread (if enabled), a projector thread (if the TCP slave
//! is enabled), and an MQTT publisher thread (if enabled). No component
//! tears another down; a fatal error in one thread is logged and that
//! thread exits, matching the no-cancellation, teardown-on-exit model.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::config::GatewayConfig;
use crate::poller::UartPoller;
use crate::projector::SlaveProjector;
use crate::serial::{SerialChannel, SerialParams};
use crate::snapshot::SnapshotStore;
use crate::tcp_slave::{self, SlaveStorage};

/// Maps a logical `uart_port` number from the config to the OS serial
/// device path for it. Host-specific; production deployments inject this
/// instead of guessing.
pub trait UartResolver: Send + Sync {
    fn resolve(&self, uart_port: u8) -> Result<String>;
    fn params(&self, uart_port: u8) -> SerialParams;
}

pub fn run(config: GatewayConfig, resolver: &dyn UartResolver) -> Result<()> {
    config.validate()?;

    let snapshot = Arc::new(SnapshotStore::new(config.groups.len()));

    let mut by_uart: BTreeMap<u8, Vec<(usize, crate::config::PollGroup)>> = BTreeMap::new();
    for (index, group) in config.groups.iter().enumerate() {
        by_uart
            .entry(group.uart_port)
            .or_default()
            .push((index, group.clone()));
    }

    let mut handles = Vec::new();
    for (uart_port, groups) in by_uart {
        let device = resolver.resolve(uart_port)?;
        let params = resolver.params(uart_port);
        let channel = SerialChannel::open(&device, params)
            .with_context(|| format!("opening uart {uart_port} ({device})"))?;
        let mut poller = UartPoller::new(channel, groups, snapshot.clone());
        let poll_interval = Duration::from_millis(config.poll_interval_ms as u64);
        handles.push(std::thread::spawn(move || loop {
            poller.poll_round();
            std::thread::sleep(poll_interval);
        }));
    }

    if config.tcp_slave.enabled {
        let storage = Arc::new(RwLock::new(SlaveStorage::default()));
        let tcp_config = config.tcp_slave.clone();
        let tcp_storage = storage.clone();
        handles.push(std::thread::spawn(move || {
            if let Err(e) = tcp_slave::serve(tcp_config, tcp_storage) {
                log::error!("tcp slave engine stopped: {e:#}");
            }
        }));

        let projector = SlaveProjector::new(&config.tcp_slave, snapshot.clone(), storage);
        handles.push(std::thread::spawn(move || projector.run()));
    }

    if config.mqtt.enabled {
        let mut publisher = crate::mqtt::MqttPublisher::new(config.mqtt.clone(), snapshot.clone());
        handles.push(std::thread::spawn(move || {
            if let Err(e) = publisher.run() {
                log::error!("mqtt publisher stopped: {e:#}");
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
