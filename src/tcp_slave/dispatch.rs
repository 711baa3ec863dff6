//! Per-request dispatch: parse an ADU, range-check it against the
//! configured register sizes (not the arena's full static capacity), and
//! hand it to `rmodbus` for the actual read/write. Grounded on
//! `tcp_server.c`'s `addr_check` (independent per-function-code range
//! checks producing `EXCEPTION_ILLEGAL_DATA_ADDRESS`) and on
//! `protocol::modbus::slave_holdings::build_slave_holdings_response`'s
//! processing_required/response_required shape.

use anyhow::{anyhow, Result};
use rmodbus::server::storage::ModbusStorage;
use rmodbus::server::{ModbusFrame, ModbusFrameBuf};
use rmodbus::{ErrorKind, ModbusProto};

use crate::config::RegSizes;
use crate::error::Failure;

/// Coils, discrete inputs, holding and input registers, each sized to this
/// crate's absolute maximums (`MAX_BITS`/`MAX_REGS`); the *configured*
/// `RegSizes` further restricts the addressable sub-range at request time,
/// mirroring the firmware's runtime-sized arenas over a fixed malloc.
pub type SlaveStorage = ModbusStorage<2048, 2048, 100, 100>;

/// Processes one ADU already read from a client socket, returning the
/// response bytes to send back (always non-empty for a request that
/// expects one; `rmodbus` silently drops malformed/broadcast frames that
/// need no reply).
pub fn dispatch(
    unit: u8,
    request: &[u8],
    storage: &mut SlaveStorage,
    reg_sizes: &RegSizes,
) -> Result<Option<Vec<u8>>> {
    let mut buf: ModbusFrameBuf = [0; 256];
    if request.len() > buf.len() {
        log::warn!(
            "dropping oversized tcp slave request: {} bytes > {}-byte frame buffer",
            request.len(),
            buf.len()
        );
        return Ok(None);
    }
    buf[..request.len()].copy_from_slice(request);
    let mut response = Vec::with_capacity(256);
    let mut frame = ModbusFrame::new(unit, &buf, ModbusProto::TcpUdp, &mut response);
    frame.parse().map_err(|e| anyhow!("frame parse error: {e:?}"))?;

    if frame.processing_required {
        if let Some(failure) = out_of_range(frame.func, frame.reg, frame.count, reg_sizes) {
            frame
                .set_modbus_error_if_unset(&failure)
                .map_err(|e| anyhow!("setting exception response: {e:?}"))?;
        } else {
            let result = if frame.readonly {
                frame.process_read(storage)
            } else {
                frame.process_write(storage)
            };
            if let Err(e) = result {
                // 0x02 = illegal data address, the standard Modbus exception
                // code this falls back to below.
                log::warn!("{:#}", anyhow!("{e:?}").context(Failure::ProtocolException(0x02)));
                frame
                    .set_modbus_error_if_unset(&ErrorKind::IllegalDataAddress)
                    .map_err(|e| anyhow!("setting exception response: {e:?}"))?;
            }
        }
    }

    if frame.response_required {
        frame
            .finalize_response()
            .map_err(|e| anyhow!("finalizing response: {e:?}"))?;
        log::debug!("tcp slave response: {:02x?}", response);
        return Ok(Some(response));
    }
    Ok(None)
}

/// Returns the exception to raise, if any, for a request's address range
/// against the *configured* (not the arena's static) size for its register
/// class. FC23 (combined read/write) checks the write range independently
/// of the read range, per the source firmware.
fn out_of_range(func: u8, start: u16, count: u16, reg_sizes: &RegSizes) -> Option<ErrorKind> {
    let limit = match func {
        1 | 5 | 15 => reg_sizes.bits,
        2 => reg_sizes.input_bits,
        3 | 6 | 16 | 22 => reg_sizes.registers,
        4 => reg_sizes.input_registers,
        23 => reg_sizes.registers,
        _ => return Some(ErrorKind::IllegalFunction),
    };
    if start.checked_add(count).map(|end| end > limit).unwrap_or(true) {
        Some(ErrorKind::IllegalDataAddress)
    } else {
        None
    }
}
