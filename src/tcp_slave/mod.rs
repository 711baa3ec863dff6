//! Modbus TCP slave engine: a listening socket serving up to
//! [`crate::config::MAX_CLIENTS`] concurrent clients, each handled on its
//! own thread reading one ADU at a time with a 1s read timeout. Grounded on
//! `tcp_server.c`'s accept loop (`SO_REUSEADDR`, slot-limited client table,
//! blocking per-client session) and on the `roboplc` Modbus TCP server's
//! idiomatic Rust shape (`ModbusFrame::new` over `ModbusProto::TcpUdp`,
//! thread-per-client, `set_read_timeout`/`set_nodelay`).

mod dispatch;

pub use dispatch::{dispatch, SlaveStorage};

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::config::{RegSizes, TcpSlaveConfig, MAX_CLIENTS};

const SESSION_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounds concurrently-handled clients to `MAX_CLIENTS`, the same fixed
/// slot count the firmware's `clients_mutex`-guarded array enforces.
struct ClientSlots {
    active: Mutex<usize>,
}

impl ClientSlots {
    fn new() -> Self {
        Self {
            active: Mutex::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut active = self.active.lock().expect("client slot mutex poisoned");
        if *active >= MAX_CLIENTS {
            false
        } else {
            *active += 1;
            true
        }
    }

    fn release(&self) {
        let mut active = self.active.lock().expect("client slot mutex poisoned");
        *active = active.saturating_sub(1);
    }
}

/// Runs the listening loop on the calling thread until the socket errors.
/// Spawn this on its own thread from the runtime wiring.
pub fn serve(
    config: TcpSlaveConfig,
    storage: Arc<RwLock<SlaveStorage>>,
) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.server_port))
        .with_context(|| format!("binding tcp slave port {}", config.server_port))?;
    log::info!("tcp slave listening on port {}", config.server_port);

    let slots = Arc::new(ClientSlots::new());
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("tcp slave accept error: {e:#}");
                continue;
            }
        };

        if !slots.try_acquire() {
            log::warn!("tcp slave rejecting client: {MAX_CLIENTS} slots already in use");
            let _ = stream.shutdown(std::net::Shutdown::Both);
            continue;
        }

        let slots = slots.clone();
        let storage = storage.clone();
        let unit = config.slave_address;
        let reg_sizes = config.reg_sizes;
        std::thread::spawn(move || {
            if let Err(e) = handle_client(stream, unit, storage, reg_sizes) {
                log::warn!("tcp slave session ended: {e:#}");
            }
            slots.release();
        });
    }
    Ok(())
}

fn handle_client(
    stream: TcpStream,
    unit: u8,
    storage: Arc<RwLock<SlaveStorage>>,
    reg_sizes: RegSizes,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    stream.set_read_timeout(Some(SESSION_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(SESSION_READ_TIMEOUT))?;
    stream.set_nodelay(true)?;
    log::info!("tcp slave client connected: {peer:?}");

    let mut stream = stream;
    // matches `dispatch`'s 256-byte `ModbusFrameBuf`; anything longer can't
    // be a frame this engine can parse, and `dispatch` rejects it anyway.
    let mut buf = [0u8; 256];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e).context("reading from tcp slave client"),
        };

        let response = {
            let mut storage = storage.write();
            dispatch::dispatch(unit, &buf[..n], &mut storage, &reg_sizes)?
        };
        if let Some(response) = response {
            stream
                .write_all(&response)
                .context("writing tcp slave response")?;
        }
    }
    log::info!("tcp slave client disconnected: {peer:?}");
    Ok(())
}
