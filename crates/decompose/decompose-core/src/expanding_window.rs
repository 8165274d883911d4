//! Expanding test window.
//!
//! A bucketed buffer holding the `(value, prediction)` history the
//! seasonality test runs on. The bucket count is fixed; when the window
//! fills it compresses by stepping to the next longer bucket length in its
//! schedule, preserving statistical power while holding long histories in
//! bounded memory. When the schedule is exhausted the window restarts.

use decompose_spi::{
    floor_to, DocumentReader, DocumentWriter, MeanAccumulator, MeanVarAccumulator, TimePoint,
};

use crate::checksum::Checksummer;
use crate::stats;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandingWindow {
    job_bucket_length: TimePoint,
    bucket_lengths: Vec<TimePoint>,
    bucket_length_index: usize,
    number_buckets: usize,
    buckets: Vec<MeanAccumulator>,
    start_time: TimePoint,
    mean_offset: MeanAccumulator,
    within_bucket: MeanVarAccumulator,
    decay_rate: f64,
}

impl ExpandingWindow {
    pub fn new(
        job_bucket_length: TimePoint,
        bucket_lengths: Vec<TimePoint>,
        number_buckets: usize,
        decay_rate: f64,
    ) -> Self {
        let bucket_lengths =
            if bucket_lengths.is_empty() { vec![job_bucket_length] } else { bucket_lengths };
        Self {
            job_bucket_length,
            bucket_lengths,
            bucket_length_index: 0,
            number_buckets,
            buckets: vec![MeanAccumulator::new(); number_buckets],
            start_time: 0,
            mean_offset: MeanAccumulator::new(),
            within_bucket: MeanVarAccumulator::new(),
            decay_rate,
        }
    }

    /// Restart the window at `time`, which callers align to the maximum
    /// bucket length.
    pub fn initialize(&mut self, time: TimePoint) {
        self.start_time = time;
        self.bucket_length_index = 0;
        self.buckets = vec![MeanAccumulator::new(); self.number_buckets];
        self.mean_offset = MeanAccumulator::new();
        self.within_bucket = MeanVarAccumulator::new();
    }

    pub fn bucket_length(&self) -> TimePoint {
        self.bucket_lengths[self.bucket_length_index]
    }

    pub fn max_bucket_length(&self) -> TimePoint {
        self.bucket_lengths.last().copied().unwrap_or(self.job_bucket_length)
    }

    pub fn begin_values_time(&self) -> TimePoint {
        self.start_time
    }

    /// Start of the first window bucket.
    pub fn bucket_start_time(&self) -> TimePoint {
        self.start_time
    }

    /// Representative sample time of bucket `index`.
    pub fn value_time(&self, index: usize) -> TimePoint {
        let offset = self.mean_offset.mean().round() as TimePoint;
        self.start_time
            + index as TimePoint * self.bucket_length()
            + offset.clamp(0, self.bucket_length() - 1)
    }

    pub fn have_shorter_windows(&self) -> bool {
        self.bucket_length_index > 0
    }

    /// Whether `time` is past the current capacity.
    pub fn need_to_compress(&self, time: TimePoint) -> bool {
        time >= self.start_time + self.number_buckets as TimePoint * self.bucket_length()
    }

    pub fn add(&mut self, time: TimePoint, value: f64, prediction: f64, weight: f64) {
        if time < self.start_time {
            return;
        }
        while self.need_to_compress(time) {
            if self.bucket_length_index + 1 < self.bucket_lengths.len() {
                self.compress();
            } else {
                self.initialize(floor_to(time, self.max_bucket_length()));
                break;
            }
        }
        let index = ((time - self.start_time) / self.bucket_length()) as usize;
        self.buckets[index].add(value, weight);
        self.mean_offset.add(((time - self.start_time) % self.bucket_length()) as f64, weight);
        self.within_bucket.add(value - prediction, weight);
    }

    /// Step to the next bucket length, merging whole groups of buckets.
    fn compress(&mut self) {
        let current = self.bucket_length();
        self.bucket_length_index += 1;
        let ratio = (self.bucket_length() / current) as usize;
        let mut compressed = vec![MeanAccumulator::new(); self.number_buckets];
        for (index, bucket) in self.buckets.iter().enumerate() {
            compressed[index / ratio].merge(bucket);
        }
        self.buckets = compressed;
    }

    pub fn values(&self) -> Vec<MeanAccumulator> {
        self.buckets.clone()
    }

    /// The window values with a predictor's value at each bucket's sample
    /// time subtracted.
    pub fn values_minus_prediction(
        &self,
        predictor: &mut dyn FnMut(TimePoint) -> f64,
    ) -> Vec<MeanAccumulator> {
        let mut values = self.buckets.clone();
        for (index, value) in values.iter_mut().enumerate() {
            if value.count() > 0.0 {
                value.shift(-predictor(self.value_time(index)));
            }
        }
        values
    }

    pub fn within_bucket_variance(&self) -> f64 {
        self.within_bucket.variance()
    }

    pub fn shift_time(&mut self, _time: TimePoint, shift: TimePoint) {
        self.start_time += shift;
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        let factor = (-self.decay_rate * time).exp();
        for bucket in &mut self.buckets {
            bucket.age(factor);
        }
        self.within_bucket.age(factor);
    }

    pub fn number_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn populated_buckets(&self) -> usize {
        self.buckets.iter().filter(|bucket| bucket.count() > 0.0).count()
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.buckets.capacity() * std::mem::size_of::<MeanAccumulator>()
            + self.bucket_lengths.capacity() * std::mem::size_of::<TimePoint>()
    }

    pub fn persist(&self, writer: &mut DocumentWriter) {
        writer.field("bucket_length_index", self.bucket_length_index);
        writer.field("start_time", self.start_time);
        stats::persist_mean(writer, "mean_offset", &self.mean_offset);
        stats::persist_mean_var(writer, "within_bucket", &self.within_bucket);
        for bucket in &self.buckets {
            writer.level("bucket", |w| {
                w.field("count", bucket.count());
                w.field("mean", bucket.mean());
            });
        }
    }

    /// Restore into a window already parameterized for this job.
    pub fn restore(&mut self, reader: &DocumentReader) -> bool {
        let Some(index) = reader.parse::<usize>("bucket_length_index") else {
            return false;
        };
        if index >= self.bucket_lengths.len() {
            return false;
        }
        let Some(start_time) = reader.parse("start_time") else {
            return false;
        };
        let (Some(mean_offset), Some(within_bucket)) = (
            stats::restore_mean(reader, "mean_offset"),
            stats::restore_mean_var(reader, "within_bucket"),
        ) else {
            return false;
        };
        let mut buckets = Vec::with_capacity(self.number_buckets);
        for level in reader.levels("bucket") {
            match (level.parse("count"), level.parse("mean")) {
                (Some(count), Some(mean)) => {
                    buckets.push(MeanAccumulator::from_parts(count, mean));
                }
                _ => return false,
            }
        }
        if buckets.len() != self.number_buckets {
            return false;
        }
        self.bucket_length_index = index;
        self.start_time = start_time;
        self.mean_offset = mean_offset;
        self.within_bucket = within_bucket;
        self.buckets = buckets;
        true
    }

    pub fn checksum(&self, ck: &mut Checksummer) {
        ck.i64(self.job_bucket_length)
            .usize(self.bucket_length_index)
            .usize(self.number_buckets)
            .i64(self.start_time);
        stats::checksum_mean(ck, &self.mean_offset);
        stats::checksum_mean_var(ck, &self.within_bucket);
        for bucket in &self.buckets {
            stats::checksum_mean(ck, bucket);
        }
    }
}
