use std::io::Write;

/// Initializes process-wide logging. `RUST_LOG` takes precedence; otherwise
/// defaults to `info` for this crate's own modules and `warn` for everything
/// else, so a noisy dependency doesn't drown out gateway events.
pub fn init() {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:5} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Warn)
        .filter_module("modbus_gateway", log::LevelFilter::Info);

    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    let _ = builder.try_init();
}
