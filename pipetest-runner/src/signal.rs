// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling shutdown signals during a run.
//!
//! Signals are received on a dedicated thread and recorded in a shared [`SignalStatus`]. The
//! [`SignalWatchdog`](crate::stages::SignalWatchdog) stage polls that status from the coordinator
//! thread and stops the pipeline. A second shutdown signal restores the default disposition and
//! re-raises it, so that a drain that hangs can always be interrupted.

use crate::errors::SignalHandlerSetupError;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

/// The kind of signal handling to set up for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler: capture interrupt and termination signals.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        let status = SignalStatus::default();
        match self {
            Self::Standard => SignalHandler::new(status),
            Self::Noop => Ok(SignalHandler {
                status,
                _signals: None,
            }),
        }
    }
}

/// A shutdown request received from the OS, ordered by severity.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ShutdownEvent {
    /// `SIGINT`, or Ctrl-C.
    Interrupt,

    /// `SIGTERM` or `SIGHUP`.
    Term,
}

impl ShutdownEvent {
    fn to_u8(self) -> u8 {
        match self {
            ShutdownEvent::Interrupt => 1,
            ShutdownEvent::Term => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ShutdownEvent::Interrupt),
            2 => Some(ShutdownEvent::Term),
            _ => None,
        }
    }
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownEvent::Interrupt => write!(f, "interrupt"),
            ShutdownEvent::Term => write!(f, "termination signal"),
        }
    }
}

/// The most severe shutdown signal received so far. Cheap to clone and share across threads.
#[derive(Clone, Debug, Default)]
pub struct SignalStatus {
    worst: Arc<AtomicU8>,
}

impl SignalStatus {
    /// Returns the most severe shutdown signal received, if any.
    pub fn received(&self) -> Option<ShutdownEvent> {
        ShutdownEvent::from_u8(self.worst.load(Ordering::Acquire))
    }

    /// Records `event`, returning true if it is the first shutdown signal.
    pub(crate) fn record(&self, event: ShutdownEvent) -> bool {
        self.worst.fetch_max(event.to_u8(), Ordering::AcqRel) == 0
    }
}

/// Owns the signal thread for as long as a run needs it.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    status: SignalStatus,
    _signals: Option<imp::SignalThread>,
}

impl SignalHandler {
    fn new(status: SignalStatus) -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::SignalThread::spawn(status.clone())?;
        Ok(Self {
            status,
            _signals: signals,
        })
    }

    pub(crate) fn status(&self) -> &SignalStatus {
        &self.status
    }
}

#[cfg(unix)]
mod imp {
    use super::{ShutdownEvent, SignalStatus};
    use signal_hook::{
        consts::{SIGHUP, SIGINT, SIGTERM},
        iterator::{Handle, Signals},
        low_level,
    };
    use std::{io, thread::JoinHandle};
    use tracing::{info, warn};

    /// Receives SIGINT, SIGTERM and SIGHUP on a background thread.
    #[derive(Debug)]
    pub(super) struct SignalThread {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
    }

    impl SignalThread {
        pub(super) fn spawn(status: SignalStatus) -> io::Result<Option<Self>> {
            let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
            let handle = signals.handle();
            let thread = std::thread::Builder::new()
                .name("pipetest-signals".to_owned())
                .spawn(move || {
                    for signal in signals.forever() {
                        let event = if signal == SIGINT {
                            ShutdownEvent::Interrupt
                        } else {
                            ShutdownEvent::Term
                        };
                        if status.record(event) {
                            info!("received {event}, stopping run");
                        } else {
                            warn!("received {event} during shutdown, exiting immediately");
                            if let Err(error) = low_level::emulate_default_handler(signal) {
                                warn!("failed to restore default handler for {event}: {error}");
                            }
                        }
                    }
                })?;
            Ok(Some(Self {
                handle,
                thread: Some(thread),
            }))
        }
    }

    impl Drop for SignalThread {
        fn drop(&mut self) {
            self.handle.close();
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::SignalStatus;
    use std::io;

    #[derive(Debug)]
    pub(super) struct SignalThread;

    impl SignalThread {
        pub(super) fn spawn(_status: SignalStatus) -> io::Result<Option<Self>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn status_keeps_the_most_severe_signal() {
        let status = SignalStatus::default();
        assert_eq!(status.received(), None);
        assert!(status.record(ShutdownEvent::Term));
        assert!(!status.record(ShutdownEvent::Interrupt));
        assert_eq!(status.received(), Some(ShutdownEvent::Term));
    }

    #[test]
    fn noop_handler_records_nothing() {
        let handler = SignalHandlerKind::Noop.build().expect("noop always builds");
        assert_eq!(handler.status().received(), None);
    }

    #[cfg(unix)]
    #[test]
    fn standard_handler_records_sigterm() {
        let handler = SignalHandlerKind::Standard
            .build()
            .expect("signal handler installed");
        // SAFETY: raising a signal that the handler above intercepts.
        let ret = unsafe { libc::raise(libc::SIGTERM) };
        assert_eq!(ret, 0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.status().received().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handler.status().received(), Some(ShutdownEvent::Term));
    }
}
