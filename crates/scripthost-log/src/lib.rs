// ABOUTME: Shared logging setup for scripthost binaries
// ABOUTME: init() for plain stderr logging, init_for() for crate-filtered daemons

use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Crate-filtered logging to stderr. Default: INFO for the named crates, WARN for everything else.
/// The bot binary passes both its own crate and `scripthost_core` so supervisor events show up.
pub fn init_for(crate_names: &[&str]) {
    let mut filter = EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into());
    for name in crate_names {
        let directive = format!("{name}=info");
        filter = filter.add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        );
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_for() {
        let _ = super::init_for as fn(&[&str]);
    }
}
