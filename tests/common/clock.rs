use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use shamap_consensus::{consensus::Clock, types::data_types::NetTime};

/// A [`Clock`] that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub(crate) struct ManualClock(Arc<Mutex<ManualTime>>);

struct ManualTime {
    started: Instant,
    net_started: NetTime,
    elapsed: Duration,
}

impl ManualClock {
    pub(crate) fn new(net_now: NetTime) -> ManualClock {
        ManualClock(Arc::new(Mutex::new(ManualTime {
            started: Instant::now(),
            net_started: net_now,
            elapsed: Duration::ZERO,
        })))
    }

    pub(crate) fn advance(&self, duration: Duration) {
        self.0.lock().unwrap().elapsed += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let time = self.0.lock().unwrap();
        time.started + time.elapsed
    }

    // Whole seconds only, like the network clock.
    fn net_now(&self) -> NetTime {
        let time = self.0.lock().unwrap();
        time.net_started + time.elapsed
    }
}
