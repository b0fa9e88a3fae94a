use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

const DEFAULT_DIRECTIVES: &str = "warn,rapport=info,rapport_core=info";

/// `RUST_LOG` when set, otherwise informational output from Rapport crates.
pub fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Installs the global subscriber. Log lines go to stderr so streamed replies
/// on stdout stay clean. Safe to call more than once.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false));
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialisation_is_a_no_op() {
        init_tracing(EnvFilter::new("debug")).unwrap();
        init_tracing(EnvFilter::new("debug")).unwrap();
    }
}
