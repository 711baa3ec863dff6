mod channel;

pub use channel::{t35_gap, SerialChannel, SerialParams};
