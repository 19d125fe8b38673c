/// Install a global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG` (default `info`), and `json` selects
/// newline-delimited JSON output. Returns `false` if a subscriber was
/// already installed.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) -> bool {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(all(test, feature = "tracing-basic"))]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        let _ = init_tracing(false);
        assert!(!init_tracing(true));
    }
}
