use std::collections::VecDeque;
use std::time::Instant;

const SAMPLE_CAPACITY: usize = 16;

/// RTT-based server clock estimation with outlier rejection.
///
/// Each sync exchange yields one offset sample; the smoothed offset is the
/// mean of the samples that survive a median/stddev filter, which shrugs
/// off the occasional delayed or retransmitted exchange.
#[derive(Debug)]
pub struct ClockSync {
    epoch: Instant,
    samples: VecDeque<f64>,
    smoothed_offset: Option<f64>,
    last_rtt_ms: f64,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            smoothed_offset: None,
            last_rtt_ms: 0.0,
        }
    }

    /// Milliseconds since client start; the local half of every exchange.
    pub fn local_now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// Feeds one completed sync exchange.
    pub fn on_reply(
        &mut self,
        client_send_time_ms: u32,
        server_receive_time_ms: u32,
        server_send_time_ms: u32,
    ) {
        let client_receive_time_ms = self.local_now_ms();

        let server_hold =
            server_send_time_ms.wrapping_sub(server_receive_time_ms) as f64;
        let rtt =
            (client_receive_time_ms - client_send_time_ms as f64 - server_hold).max(0.0);
        let server_time_at_receive = server_send_time_ms as f64 + rtt / 2.0;
        let offset = server_time_at_receive - client_receive_time_ms;

        if self.samples.len() >= SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(offset);
        self.last_rtt_ms = rtt;
        self.smoothed_offset = Some(Self::filtered_offset(&self.samples));
    }

    /// Mean for tiny sample sets; otherwise mean of the samples within
    /// `max(1 ms, 1.5 σ)` of the median, falling back to the median when
    /// the filter rejects everything.
    fn filtered_offset(samples: &VecDeque<f64>) -> f64 {
        let n = samples.len();
        if n < 3 {
            return samples.iter().sum::<f64>() / n as f64;
        }

        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let tolerance = (1.5 * variance.sqrt()).max(1.0);

        let survivors: Vec<f64> = samples
            .iter()
            .copied()
            .filter(|x| (x - median).abs() <= tolerance)
            .collect();

        if survivors.is_empty() {
            median
        } else {
            survivors.iter().sum::<f64>() / survivors.len() as f64
        }
    }

    /// Estimated server time, once at least one exchange has completed.
    pub fn server_time_now_ms(&self) -> Option<f64> {
        self.smoothed_offset
            .map(|offset| self.local_now_ms() + offset)
    }

    pub fn is_synchronized(&self) -> bool {
        self.smoothed_offset.is_some()
    }

    pub fn rtt_ms(&self) -> f64 {
        self.last_rtt_ms
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed_offset = None;
        self.last_rtt_ms = 0.0;
    }
}
