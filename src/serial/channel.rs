use std::io::ErrorKind;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serialport::{DataBits, Parity, SerialPort, StopBits};

const READ_BUF_SIZE: usize = 256;
const MAX_ASSEMBLING_LEN: usize = 768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

/// Computes the Modbus RTU T3.5 silent interval: 3.5 character times at the
/// given link parameters. A frame is considered complete once no byte has
/// arrived for this long.
pub fn t35_gap(params: &SerialParams) -> Duration {
    let bit_time_us = 1_000_000u64 / params.baud as u64;
    let bits_per_byte = params.data_bits as u64 + params.stop_bits as u64 + 1;
    let byte_time_us = bit_time_us * bits_per_byte;
    Duration::from_micros(byte_time_us * 35 / 10)
}

/// A single RTU serial link: an open port plus T3.5 frame assembly on top of
/// it. Each configured UART gets its own `SerialChannel`, reused across every
/// poll group bound to that port.
pub struct SerialChannel {
    port_name: String,
    params: SerialParams,
    port: Box<dyn SerialPort>,
    gap: Duration,
}

impl SerialChannel {
    pub fn open(port_name: &str, params: SerialParams) -> Result<Self> {
        let port = open_port(port_name, &params)?;
        let gap = t35_gap(&params);
        Ok(Self {
            port_name: port_name.to_string(),
            params,
            port,
            gap,
        })
    }

    pub fn set_params(&mut self, params: SerialParams) -> Result<()> {
        self.port = open_port(&self.port_name, &params)?;
        self.gap = t35_gap(&params);
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> SerialParams {
        self.params
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .with_context(|| format!("writing to {}", self.port_name))?;
        self.port
            .flush()
            .with_context(|| format!("flushing {}", self.port_name))
    }

    /// Reads until a T3.5 silent interval is observed after the last byte,
    /// the assembling buffer overflows, or `overall_timeout` elapses with no
    /// bytes at all. Mirrors `boot_serial_loop`'s assembling/finalize split.
    pub fn receive(&mut self, overall_timeout: Duration) -> Result<Vec<u8>> {
        let mut assembling = Vec::new();
        let mut last_byte: Option<Instant> = None;
        let started = Instant::now();
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            if let Some(last) = last_byte {
                if !assembling.is_empty() && last.elapsed() >= self.gap {
                    return Ok(assembling);
                }
            }
            if started.elapsed() >= overall_timeout {
                anyhow::ensure!(
                    !assembling.is_empty(),
                    "timed out waiting for any byte on {}",
                    self.port_name
                );
                return Ok(assembling);
            }

            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    assembling.extend_from_slice(&buf[..n]);
                    last_byte = Some(Instant::now());
                    if assembling.len() >= MAX_ASSEMBLING_LEN {
                        return Ok(assembling);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e).context(format!("reading from {}", self.port_name)),
            }
        }
    }
}

fn open_port(port_name: &str, params: &SerialParams) -> Result<Box<dyn SerialPort>> {
    serialport::new(port_name, params.baud)
        .data_bits(match params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        })
        .parity(params.parity)
        .stop_bits(match params.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        })
        .timeout(Duration::from_millis(50))
        .open()
        .with_context(|| format!("opening serial port {port_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_t35_gap_at_9600_baud() {
        let params = SerialParams {
            baud: 9600,
            ..Default::default()
        };
        // bit time ~104us, 10 bits/byte, *3.5 ~= 3645us
        let gap = t35_gap(&params);
        assert!(gap.as_micros() > 3000 && gap.as_micros() < 4200);
    }

    #[test]
    fn t35_gap_shrinks_as_baud_rises() {
        let slow = t35_gap(&SerialParams {
            baud: 9600,
            ..Default::default()
        });
        let fast = t35_gap(&SerialParams {
            baud: 115200,
            ..Default::default()
        });
        assert!(fast < slow);
    }
}
