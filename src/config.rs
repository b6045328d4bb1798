//! Host options recognized from the external command-line surface.
//!
//! Only two options affect the plugin runtime: `Producer=<name>` restricts
//! discovery to a single producer package, and `UpdateRate=<ms>` sets the
//! poll interval. Everything else the outer parser sees is ignored here.

use std::time::Duration;

use tracing::{debug, warn};

/// Lowest accepted poll interval in milliseconds.
pub const UPDATE_RATE_MIN_MS: u64 = 16;
/// Highest accepted poll interval in milliseconds.
pub const UPDATE_RATE_MAX_MS: u64 = 2000;
/// Interval used when `UpdateRate` is absent, unparsable or out of range.
pub const DEFAULT_UPDATE_RATE_MS: u64 = 33;

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// When set, discovery loads only this producer package (plus every
    /// non-producer package).
    pub producer: Option<String>,
    /// Delay between poll iterations.
    pub update_rate: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            producer: None,
            update_rate: Duration::from_millis(DEFAULT_UPDATE_RATE_MS),
        }
    }
}

impl HostOptions {
    /// Build options from `key=value` pairs handed over by the external
    /// command-line parser. Keys are matched case-insensitively; unknown
    /// keys are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut options = Self::default();
        for (key, value) in pairs {
            if key.eq_ignore_ascii_case("producer") {
                options.producer = Some(value.to_string()).filter(|v| !v.is_empty());
            } else if key.eq_ignore_ascii_case("updaterate") {
                options.update_rate = parse_update_rate(value);
            } else {
                debug!(key, "ignoring unrecognized host option");
            }
        }
        options
    }
}

/// Parse an `UpdateRate` value, clamping to the documented default.
///
/// Emits exactly one warning per offending value.
pub fn parse_update_rate(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(ms) if (UPDATE_RATE_MIN_MS..=UPDATE_RATE_MAX_MS).contains(&ms) => {
            Duration::from_millis(ms)
        }
        Ok(ms) => {
            warn!(
                value = ms,
                default = DEFAULT_UPDATE_RATE_MS,
                "UpdateRate outside [{UPDATE_RATE_MIN_MS}, {UPDATE_RATE_MAX_MS}], using default"
            );
            Duration::from_millis(DEFAULT_UPDATE_RATE_MS)
        }
        Err(_) => {
            warn!(
                value = raw,
                default = DEFAULT_UPDATE_RATE_MS,
                "UpdateRate is not a number, using default"
            );
            Duration::from_millis(DEFAULT_UPDATE_RATE_MS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;

    #[derive(Default, Clone)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Count the WARN events emitted while `f` runs.
    fn warns_during(f: impl FnOnce()) -> usize {
        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, f);
        counter.0.load(Ordering::SeqCst)
    }

    #[test]
    fn in_range_update_rate_is_accepted_unchanged() {
        assert_eq!(parse_update_rate("200"), Duration::from_millis(200));
        assert_eq!(
            parse_update_rate("16"),
            Duration::from_millis(UPDATE_RATE_MIN_MS)
        );
        assert_eq!(
            parse_update_rate("2000"),
            Duration::from_millis(UPDATE_RATE_MAX_MS)
        );
    }

    #[test]
    fn out_of_range_update_rate_falls_back_to_default() {
        let default = Duration::from_millis(DEFAULT_UPDATE_RATE_MS);
        assert_eq!(parse_update_rate("5000"), default);
        assert_eq!(parse_update_rate("15"), default);
        assert_eq!(parse_update_rate("2001"), default);
        assert_eq!(parse_update_rate("0"), default);
    }

    #[test]
    fn unparsable_update_rate_falls_back_to_default() {
        let default = Duration::from_millis(DEFAULT_UPDATE_RATE_MS);
        assert_eq!(parse_update_rate("fast"), default);
        assert_eq!(parse_update_rate(""), default);
        assert_eq!(parse_update_rate("-5"), default);
    }

    #[test]
    fn offending_update_rate_warns_exactly_once() {
        let default = Duration::from_millis(DEFAULT_UPDATE_RATE_MS);
        let warns = warns_during(|| {
            assert_eq!(parse_update_rate("5000"), default);
        });
        assert_eq!(warns, 1);

        let warns = warns_during(|| {
            assert_eq!(parse_update_rate("fast"), default);
        });
        assert_eq!(warns, 1);

        let warns = warns_during(|| {
            assert_eq!(parse_update_rate("200"), Duration::from_millis(200));
        });
        assert_eq!(warns, 0);
    }

    #[test]
    fn pairs_are_matched_case_insensitively() {
        let options = HostOptions::from_pairs([("PRODUCER", "cpu"), ("updaterate", "100")]);
        assert_eq!(options.producer.as_deref(), Some("cpu"));
        assert_eq!(options.update_rate, Duration::from_millis(100));
    }

    #[test]
    fn empty_producer_means_load_everything() {
        let options = HostOptions::from_pairs([("Producer", "")]);
        assert_eq!(options.producer, None);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let options = HostOptions::from_pairs([("Color", "green")]);
        assert_eq!(options.producer, None);
        assert_eq!(
            options.update_rate,
            Duration::from_millis(DEFAULT_UPDATE_RATE_MS)
        );
    }
}
