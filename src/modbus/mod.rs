//! Thin per-function-code wrappers around `rmodbus`'s client codec. Each
//! wrapper pairs a request generator with the matching response parser, the
//! same shape the original protocol layer uses for its pull requests.

mod pull_get_coils;
mod pull_get_discrete_inputs;
mod pull_get_holdings;
mod pull_get_inputs;

pub use pull_get_coils::{generate_pull_get_coils_request, parse_pull_get_coils};
pub use pull_get_discrete_inputs::{
    generate_pull_get_discrete_inputs_request, parse_pull_get_discrete_inputs,
};
pub use pull_get_holdings::{generate_pull_get_holdings_request, parse_pull_get_holdings};
pub use pull_get_inputs::{generate_pull_get_inputs_request, parse_pull_get_inputs};

use anyhow::Result;
use rmodbus::client::ModbusRequest;

use crate::config::ReadFunction;

/// Result of one poll: either packed bit values or 16-bit register values,
/// normalized so the poller doesn't need a match on `ReadFunction` at every
/// call site.
pub enum PolledValues {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

pub fn generate_pull_request(
    function: ReadFunction,
    slave_addr: u8,
    start_addr: u16,
    reg_count: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    match function {
        ReadFunction::Coils => {
            generate_pull_get_coils_request(slave_addr, start_addr, reg_count)
        }
        ReadFunction::DiscreteInputs => {
            generate_pull_get_discrete_inputs_request(slave_addr, start_addr, reg_count)
        }
        ReadFunction::HoldingRegisters => {
            generate_pull_get_holdings_request(slave_addr, start_addr, reg_count)
        }
        ReadFunction::InputRegisters => {
            generate_pull_get_inputs_request(slave_addr, start_addr, reg_count)
        }
    }
}

pub fn parse_pull_response(
    function: ReadFunction,
    request: &mut ModbusRequest,
    response: Vec<u8>,
    reg_count: u16,
) -> Result<PolledValues> {
    match function {
        ReadFunction::Coils => {
            parse_pull_get_coils(request, response, reg_count).map(PolledValues::Bits)
        }
        ReadFunction::DiscreteInputs => {
            parse_pull_get_discrete_inputs(request, response, reg_count).map(PolledValues::Bits)
        }
        ReadFunction::HoldingRegisters => {
            parse_pull_get_holdings(request, response).map(PolledValues::Words)
        }
        ReadFunction::InputRegisters => {
            parse_pull_get_inputs(request, response).map(PolledValues::Words)
        }
    }
}
