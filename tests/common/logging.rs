use std::{io, sync::Once, thread};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use log::LevelFilter;

static LOGGER_INIT: Once = Once::new();

/// Log messages at `level` and above to stdout, tagged with the thread that logged them. Only the first
/// call in a test binary has an effect.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        let result = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply();
        if result.is_err() {
            eprintln!("A logger was already installed");
        }
    })
}

/// Abbreviate a key or hash to its first 7 base64 characters.
pub(crate) fn short_id(bytes: &[u8]) -> String {
    let mut encoded = STANDARD_NO_PAD.encode(bytes);
    encoded.truncate(7);
    encoded
}
