use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of independently-configured poll groups.
pub const MAX_POLL_GROUPS: usize = 10;
/// Upper bound on the register count a single poll group or TCP map entry may span.
pub const MAX_REGS: usize = 100;
/// Upper bound on the bit count a single poll group or TCP map entry may span.
pub const MAX_BITS: usize = 2048;
/// Upper bound on the number of slave register-map entries.
pub const MAX_MAPS: usize = 10;
/// Upper bound on concurrently connected TCP slave clients.
pub const MAX_CLIENTS: usize = 3;

/// Modbus function codes a poll group may use to read its remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadFunction {
    Coils = 1,
    DiscreteInputs = 2,
    HoldingRegisters = 3,
    InputRegisters = 4,
}

impl ReadFunction {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Coils),
            2 => Some(Self::DiscreteInputs),
            3 => Some(Self::HoldingRegisters),
            4 => Some(Self::InputRegisters),
            _ => None,
        }
    }

    pub fn is_bits(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }
}

/// One independently-polled (slave address, function code, address range)
/// group, bound to a specific UART.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollGroup {
    pub enabled: bool,
    pub slave_addr: u8,
    pub function_code: ReadFunction,
    pub start_addr: u16,
    pub reg_count: u16,
    pub uart_port: u8,
}

impl Default for PollGroup {
    fn default() -> Self {
        Self {
            enabled: true,
            slave_addr: 1,
            function_code: ReadFunction::Coils,
            start_addr: 0,
            reg_count: 10,
            uart_port: 1,
        }
    }
}

/// Byte/word layout used to decode a 16-bit register pair or a raw 16-bit
/// value before it is emitted as JSON by the MQTT publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMethod {
    Int16Unsigned,
    Int16Signed,
    Int32Abcd,
    Int32Cdab,
    Int32Badc,
    Int32Dcba,
    Float32Abcd,
    Float32Cdab,
    Float32Badc,
    Float32Dcba,
}

impl ParseMethod {
    /// Whether this method consumes two registers instead of one.
    pub fn is_wide(self) -> bool {
        !matches!(self, Self::Int16Unsigned | Self::Int16Signed)
    }
}

impl Default for ParseMethod {
    fn default() -> Self {
        Self::Int16Unsigned
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_url: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub group_ids: Vec<u8>,
    pub publish_interval_ms: u32,
    pub parse_methods: Vec<ParseMethod>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: String::new(),
            username: String::new(),
            password: String::new(),
            topic: "modbus/data".to_string(),
            group_ids: vec![0],
            publish_interval_ms: 5000,
            parse_methods: vec![ParseMethod::Int16Unsigned; MAX_POLL_GROUPS],
        }
    }
}

/// Which snapshot table a slave register-map entry copies from/to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapKind {
    CoilToCoil,
    DiscreteToDiscrete,
    HoldingToHolding,
    InputToInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntry {
    pub kind: MapKind,
    pub group_index: usize,
    pub master_start_addr: u16,
    pub slave_start_addr: u16,
    pub count: u16,
}

/// Sizes of the four flat register arenas the TCP slave engine serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegSizes {
    pub bits: u16,
    pub input_bits: u16,
    pub registers: u16,
    pub input_registers: u16,
}

impl Default for RegSizes {
    fn default() -> Self {
        Self {
            bits: 50,
            input_bits: 50,
            registers: 50,
            input_registers: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpSlaveConfig {
    pub enabled: bool,
    pub server_port: u16,
    pub slave_address: u8,
    pub maps: Vec<MapEntry>,
    pub reg_sizes: RegSizes,
}

impl Default for TcpSlaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_port: 502,
            slave_address: 123,
            maps: vec![
                MapEntry {
                    kind: MapKind::HoldingToHolding,
                    group_index: 0,
                    master_start_addr: 0,
                    slave_start_addr: 0,
                    count: 10,
                },
                MapEntry {
                    kind: MapKind::InputToInput,
                    group_index: 1,
                    master_start_addr: 0,
                    slave_start_addr: 10,
                    count: 10,
                },
                MapEntry {
                    kind: MapKind::CoilToCoil,
                    group_index: 2,
                    master_start_addr: 0,
                    slave_start_addr: 0,
                    count: 10,
                },
                MapEntry {
                    kind: MapKind::DiscreteToDiscrete,
                    group_index: 3,
                    master_start_addr: 0,
                    slave_start_addr: 10,
                    count: 10,
                },
            ],
            reg_sizes: RegSizes::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub poll_interval_ms: u32,
    pub groups: Vec<PollGroup>,
    pub mqtt: MqttConfig,
    pub tcp_slave: TcpSlaveConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            groups: vec![PollGroup::default()],
            mqtt: MqttConfig::default(),
            tcp_slave: TcpSlaveConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate fixed-size-table bounds before the runtime wires anything up.
    /// Mirrors the firmware's compile-time array bounds (`MAX_POLL_GROUPS`,
    /// `MAX_REGS`, `MAX_BITS`, `MAX_MAPS`), checked here at load time instead.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.groups.len() <= MAX_POLL_GROUPS,
            "too many poll groups: {} > {MAX_POLL_GROUPS}",
            self.groups.len()
        );
        for group in &self.groups {
            let limit = if group.function_code.is_bits() {
                MAX_BITS
            } else {
                MAX_REGS
            };
            ensure!(
                (group.reg_count as usize) <= limit,
                "poll group reg_count {} exceeds limit {limit}",
                group.reg_count
            );
        }
        ensure!(
            self.tcp_slave.maps.len() <= MAX_MAPS,
            "too many tcp slave maps: {} > {MAX_MAPS}",
            self.tcp_slave.maps.len()
        );
        for map in &self.tcp_slave.maps {
            ensure!(
                map.group_index < self.groups.len(),
                "tcp slave map references out-of-range group index {}",
                map.group_index
            );
        }
        Ok(())
    }
}
