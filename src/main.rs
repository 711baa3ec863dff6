use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Parser;

use modbus_gateway::config::GatewayConfig;
use modbus_gateway::kv_store::{JsonFileKvStore, KvStore};
use modbus_gateway::runtime::{self, UartResolver};
use modbus_gateway::logging;
use modbus_gateway::serial::SerialParams;

/// Modbus RTU-to-TCP-MQTT protocol gateway.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding one persisted JSON blob per configuration namespace.
    #[arg(long, default_value = "./gateway-state")]
    state_dir: String,

    /// uart_port=device_path pairs, e.g. "1=/dev/ttyUSB0". Repeatable.
    #[arg(long = "uart", value_parser = parse_uart_mapping)]
    uarts: Vec<(u8, String)>,

    /// Shared baud rate applied to every UART named with `--uart`.
    #[arg(long, default_value_t = 9600)]
    baud: u32,
}

fn parse_uart_mapping(raw: &str) -> Result<(u8, String), String> {
    let (port, path) = raw
        .split_once('=')
        .ok_or_else(|| "expected uart_port=device_path".to_string())?;
    let port: u8 = port.parse().map_err(|e| format!("invalid uart port: {e}"))?;
    Ok((port, path.to_string()))
}

struct StaticUartResolver {
    devices: HashMap<u8, String>,
    baud: u32,
}

impl UartResolver for StaticUartResolver {
    fn resolve(&self, uart_port: u8) -> Result<String> {
        self.devices
            .get(&uart_port)
            .cloned()
            .with_context(|| format!("no serial device configured for uart port {uart_port}"))
    }

    fn params(&self, _uart_port: u8) -> SerialParams {
        SerialParams {
            baud: self.baud,
            ..SerialParams::default()
        }
    }
}

fn load_config(store: &dyn KvStore) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::default();
    if let Some(interval) = store.load_json("modbus_cfg", "poll_interval_ms")? {
        config.poll_interval_ms = interval;
    }
    if let Some(groups) = store.load_json("modbus_cfg", "groups")? {
        config.groups = groups;
    }
    if let Some(mqtt) = store.load_json("mqtt_config", "config")? {
        config.mqtt = mqtt;
    }
    if let Some(tcp_slave) = store.load_json("tcp_slave", "config")? {
        config.tcp_slave = tcp_slave;
    }
    Ok(config)
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let store = JsonFileKvStore::new(&args.state_dir)?;
    let config = load_config(&store)?;

    let resolver = StaticUartResolver {
        devices: args.uarts.into_iter().collect(),
        baud: args.baud,
    };

    runtime::run(config, &resolver)
}
