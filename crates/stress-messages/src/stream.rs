use std::iter::FusedIterator;

use bytes::Bytes;
use killswitch::Killswitch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{generate_message_with, TIMESTAMP_LEN};

/// Lazy, unbounded sequence of messages with normally distributed sizes.
///
/// Nothing is generated ahead of time: each message is built and stamped the
/// moment it is pulled. The stream ends for good once its killswitch fires.
#[derive(Debug)]
pub struct MessageStream<R = StdRng> {
    killswitch: Killswitch,
    mean_size: usize,
    size_std_dev: f64,
    rng: R,
    finished: bool,
}

impl MessageStream<StdRng> {
    /// `size_variance` is the variance of the message size in bytes squared.
    pub fn new(killswitch: Killswitch, mean_size: usize, size_variance: f64) -> Self {
        Self::with_rng(killswitch, mean_size, size_variance, StdRng::from_os_rng())
    }
}

impl<R: Rng> MessageStream<R> {
    pub fn with_rng(killswitch: Killswitch, mean_size: usize, size_variance: f64, rng: R) -> Self {
        Self {
            killswitch,
            mean_size,
            size_std_dev: size_variance.max(0.0).sqrt(),
            rng,
            finished: false,
        }
    }

    /// Draw the size of the next message.
    ///
    /// Sizes never drop below the timestamp width when the mean is large
    /// enough to carry one.
    pub fn next_size(&mut self) -> usize {
        let z: f64 = self.rng.sample(StandardNormal);
        let size = (z * self.size_std_dev).floor() + self.mean_size as f64;
        let floor = if self.mean_size >= TIMESTAMP_LEN {
            TIMESTAMP_LEN as f64
        } else {
            0.0
        };
        size.max(floor) as usize
    }

    /// Pull the next message, or `None` once the killswitch has fired.
    pub fn next_message(&mut self) -> Option<Bytes> {
        if self.finished || self.killswitch.is_triggered() {
            self.finished = true;
            return None;
        }
        let size = self.next_size();
        Some(generate_message_with(&mut self.rng, size))
    }
}

impl<R: Rng> Iterator for MessageStream<R> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.next_message()
    }
}

impl<R: Rng> FusedIterator for MessageStream<R> {}
