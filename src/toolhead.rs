// src/toolhead.rs
// Print time bookkeeping for an idle toolhead.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core_traits::PrintTimeSource;
use crate::mcu::Mcu;
use crate::reactor::Reactor;

const BUFFER_TIME_START: f64 = 0.250;
const MIN_KIN_TIME: f64 = 0.100;
const SDS_CHECK_TIME: f64 = 0.001; // step+dir+step filter in stepcompress.c

pub struct ToolHead {
    reactor: Arc<dyn Reactor>,
    mcu: Arc<dyn Mcu>,
    print_time: Mutex<f64>,
    min_restart_time: f64,
    kin_flush_delay: f64,
}

impl ToolHead {
    pub fn new(reactor: Arc<dyn Reactor>, mcu: Arc<dyn Mcu>) -> Self {
        ToolHead {
            reactor,
            mcu,
            print_time: Mutex::new(0.0),
            min_restart_time: 0.0,
            kin_flush_delay: SDS_CHECK_TIME,
        }
    }

    /// Moves print_time forward so it is never in the MCU's past.
    fn calc_print_time(&self) -> f64 {
        let curtime = self.reactor.monotonic();
        let est_print_time = self.mcu.estimated_print_time(curtime);
        let kin_time = (est_print_time + MIN_KIN_TIME).max(self.min_restart_time) + self.kin_flush_delay;
        let min_print_time = (est_print_time + BUFFER_TIME_START).max(kin_time);

        let mut print_time = self.print_time.lock();
        if min_print_time > *print_time {
            *print_time = min_print_time;
        }
        *print_time
    }
}

impl PrintTimeSource for ToolHead {
    fn get_last_move_time(&self) -> f64 {
        self.calc_print_time()
    }
}
