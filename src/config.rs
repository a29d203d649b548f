use crate::{
    error::Error,
    report::Chart,
    signal::CancellationToken,
    telemetry::{Clock, SystemClock, TelemetrySink},
};
use derive_more::Debug;
use std::sync::Arc;

/// Per-invocation options shared by every entry mode.
///
/// ```
/// use ctg::{config::Options, signal::CancellationToken};
///
/// let signal = CancellationToken::new();
/// let options = Options::<std::io::ErrorKind>::default()
///     .debug(true)
///     .signal(signal.clone());
/// # drop(options);
/// ```
#[must_use]
#[derive(Debug, Clone)]
pub struct Options<E> {
    /// Collect telemetry and hand it to the sink after settlement.
    pub(crate) debug: bool,
    /// External token whose cancellation is forwarded to the tasks.
    pub(crate) signal: Option<CancellationToken<Error<E>>>,
    #[debug(skip)]
    pub(crate) clock: Arc<dyn Clock>,
    #[debug(skip)]
    pub(crate) sink: Arc<dyn TelemetrySink>,
}

impl<E> Default for Options<E> {
    fn default() -> Self {
        Self {
            debug: false,
            signal: None,
            clock: Arc::new(SystemClock::new()),
            sink: Arc::new(Chart::default()),
        }
    }
}

impl<E> Options<E> {
    /// Turns telemetry collection on or off.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Forwards cancellation of `signal` to every task of the run.
    pub fn signal(mut self, signal: CancellationToken<Error<E>>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Replaces the timestamp source used for telemetry.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces the consumer of telemetry, the stderr [`Chart`] by default.
    pub fn sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }
}
