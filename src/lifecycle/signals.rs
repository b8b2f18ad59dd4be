//! OS signal routing.
//!
//! A dedicated thread drives a current-thread tokio runtime that only waits on signal streams.
//! SIGTERM / SIGINT request a stop, SIGUSR1 flips verbosity. Nothing else runs in the
//! handler path: every action is a single atomic update on the coordinator.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use log::{info, warn};
use tokio::runtime::{Builder, Runtime};

use crate::lifecycle::shutdown::ShutdownCoordinator;

/// Register handlers and start the listener thread.
///
/// Registration happens before the thread is spawned so failures surface here.
pub fn install(coordinator: Arc<ShutdownCoordinator>) -> io::Result<JoinHandle<()>> {
    let rt = Builder::new_current_thread().enable_io().build()?;
    let listener = {
        let _guard = rt.enter();
        imp::Listener::register()?
    };

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || run(rt, listener, coordinator))
}

fn run(rt: Runtime, mut listener: imp::Listener, coordinator: Arc<ShutdownCoordinator>) {
    rt.block_on(async move {
        loop {
            match listener.next().await {
                Some(Action::Stop(name)) => {
                    if coordinator.request_stop() {
                        info!("[Signals] {} received, stopping", name);
                    } else {
                        warn!("[Signals] {} received, shutdown already in progress", name);
                    }
                }
                Some(Action::ToggleVerbosity) => {
                    let verbose = coordinator.toggle_verbosity();
                    // Goes out at warn so the switch is visible at any level.
                    warn!(
                        "[Signals] verbosity now {}",
                        if verbose { "verbose" } else { "normal" }
                    );
                }
                None => {
                    warn!("[Signals] signal streams closed");
                    return;
                }
            }
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Stop(&'static str),
    ToggleVerbosity,
}

#[cfg(unix)]
mod imp {
    use super::Action;
    use std::io;
    use tokio::signal::unix::{signal, Signal, SignalKind};

    pub(super) struct Listener {
        term: Signal,
        int: Signal,
        usr1: Signal,
    }

    impl Listener {
        pub(super) fn register() -> io::Result<Self> {
            Ok(Self {
                term: signal(SignalKind::terminate())?,
                int: signal(SignalKind::interrupt())?,
                usr1: signal(SignalKind::user_defined1())?,
            })
        }

        pub(super) async fn next(&mut self) -> Option<Action> {
            tokio::select! {
                s = self.term.recv() => s.map(|_| Action::Stop("SIGTERM")),
                s = self.int.recv() => s.map(|_| Action::Stop("SIGINT")),
                s = self.usr1.recv() => s.map(|_| Action::ToggleVerbosity),
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::Action;
    use std::io;

    pub(super) struct Listener;

    impl Listener {
        pub(super) fn register() -> io::Result<Self> {
            Ok(Self)
        }

        pub(super) async fn next(&mut self) -> Option<Action> {
            tokio::signal::ctrl_c().await.ok().map(|_| Action::Stop("Ctrl-C"))
        }
    }
}
