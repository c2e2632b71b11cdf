//! Liveness monitoring.
//!
//! Clients prove they are alive by sending `{"type":"ping"}` envelopes.  One
//! timer task per connection wakes every `ping_timeout` and asks the
//! connection's actor to compare the time of the last ping with the deadline.
//! The comparison itself happens in the actor because `last_ping` belongs to
//! the actor's session state.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::application::connection::Command;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Spawns the timer task for one connection.
///
/// The task ends by itself once the actor's command queue is closed; the
/// actor also aborts it on shutdown.  A zero `period` is raised to one
/// millisecond.
pub fn spawn_liveness(period: Duration, commands: mpsc::UnboundedSender<Command>) -> JoinHandle<()> {
    // `interval` panics on a zero period.
    let period = period.max(MIN_PERIOD);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // `interval` fires immediately; the first real check is one period in.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if commands.send(Command::LivenessCheck).is_err() {
                break;
            }
        }
    })
}

/// Whether a connection whose last ping was at `last_ping` is idle at `now`.
pub fn is_idle(last_ping: Instant, now: Instant, ping_timeout: Duration) -> bool {
    now.saturating_duration_since(last_ping) >= ping_timeout
}
