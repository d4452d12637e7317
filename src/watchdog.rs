use std::time::{Duration, Instant};

/// Quiet time on the sensor stream after which the session with the base is
/// reopened.
pub static SENSOR_TIMEOUT: Duration = Duration::from_secs(5);
/// Quiet time on the velocity channel after which the wheels are stopped.
pub static COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// What the cycle loop should do about traffic that has gone quiet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogAction {
    pub reinitialise: bool,
    pub stop_drive: bool,
}

/// Tracks the freshness of both inbound channels.
///
/// Each timer fires once per elapsed window. Firing re-arms the timer, so a
/// channel that stays quiet keeps producing one action per window instead of
/// one per poll.
pub struct Watchdog {
    last_sensor_update: Instant,
    last_command: Instant,
}

impl Watchdog {
    pub fn new(now: Instant) -> Self {
        Self {
            last_sensor_update: now,
            last_command: now,
        }
    }

    pub fn sensor_updated(&mut self, now: Instant) {
        self.last_sensor_update = now;
    }

    pub fn command_received(&mut self, now: Instant) {
        self.last_command = now;
    }

    pub fn poll(&mut self, now: Instant) -> WatchdogAction {
        let mut action = WatchdogAction::default();
        if now.duration_since(self.last_sensor_update) > SENSOR_TIMEOUT {
            self.last_sensor_update = now;
            action.reinitialise = true;
        }
        if now.duration_since(self.last_command) > COMMAND_TIMEOUT {
            self.last_command = now;
            action.stop_drive = true;
        }
        action
    }
}
