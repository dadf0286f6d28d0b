//! Time Series Storage and Window Indexing
//!
//! ## Overview
//!
//! One [`TimeSeries`] per measured channel, append-only for the lifetime of a
//! measurement session. Insertion order is time order: samples arrive from a
//! single polling loop reading each device in turn, so the engine never
//! reorders and never mutates in place. A new session replaces the storage
//! wholesale via [`TimeSeries::clear`].
//!
//! ## Window indexing
//!
//! Every duration-based decision in the engine (stabilization held for two
//! minutes, CO2 inside a band for two minutes) is answered by slicing a
//! series by *time*, not by sample count. Two shapes are needed:
//!
//! - [`TimeSeries::window_around`]: samples within `half_width` of a center
//!   point, for slope re-checks around a moment of interest.
//! - [`TimeSeries::trailing`]: the samples covering the last `duration`
//!   seconds. This one is deliberately strict: it returns `None` unless the
//!   series actually reaches back the full duration. A series that is only
//!   40 s old cannot testify to two minutes of stability.
//!
//! Samples are low-rate (one per second or slower) and sessions run for
//! hours, so storage is a growable `Vec` rather than a fixed ring: protocols
//! need the session's full history for baselines, and the excluded export
//! layer consumes it whole.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::time::Timestamp;

/// One measurement on one channel. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    /// Seconds since session start.
    pub timestamp: Timestamp,
    /// Value in the channel's unit (uS, ppm, degC, ohm, %RH).
    pub value: f64,
}

impl Sample {
    /// Construct a sample.
    pub const fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Measured channels the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Channel {
    /// Sensor element conductance, uS.
    Conductance = 0,
    /// Sensor element resistance, ohm.
    Resistance = 1,
    /// CO2 concentration, ppm.
    Co2 = 2,
    /// Ambient temperature, degC.
    AmbientTemp = 3,
    /// Relative humidity, %.
    Humidity = 4,
    /// Measured heater temperature, degC.
    ResistanceTemp = 5,
    /// Commanded heater setpoint, degC.
    Setpoint = 6,
}

impl Channel {
    /// All channels, in storage order.
    pub const ALL: [Channel; 7] = [
        Channel::Conductance,
        Channel::Resistance,
        Channel::Co2,
        Channel::AmbientTemp,
        Channel::Humidity,
        Channel::ResistanceTemp,
        Channel::Setpoint,
    ];

    /// Human-readable channel name.
    pub const fn name(&self) -> &'static str {
        match self {
            Channel::Conductance => "conductance",
            Channel::Resistance => "resistance",
            Channel::Co2 => "co2",
            Channel::AmbientTemp => "ambient_temp",
            Channel::Humidity => "humidity",
            Channel::ResistanceTemp => "resistance_temp",
            Channel::Setpoint => "setpoint",
        }
    }

    /// Unit of measurement for the channel.
    pub const fn unit(&self) -> &'static str {
        match self {
            Channel::Conductance => "uS",
            Channel::Resistance => "ohm",
            Channel::Co2 => "ppm",
            Channel::AmbientTemp => "degC",
            Channel::Humidity => "%",
            Channel::ResistanceTemp => "degC",
            Channel::Setpoint => "degC",
        }
    }
}

/// Ordered, append-only sequence of samples for one channel.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSeries {
    samples: Vec<Sample>,
}

impl TimeSeries {
    /// Create an empty series.
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Append a sample. The caller is the single writer and feeds samples in
    /// arrival order; timestamps are expected monotonic.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if no samples have been stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Most recent value, if any.
    pub fn last_value(&self) -> Option<f64> {
        self.samples.last().map(|s| s.value)
    }

    /// Most recent timestamp, if any.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.samples.last().map(|s| s.timestamp)
    }

    /// All samples, oldest first.
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// The last `n` samples (fewer if the series is shorter).
    pub fn tail(&self, n: usize) -> &[Sample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    /// Index bounds `(start, end)` of the samples within `half_width`
    /// seconds of `center`, end exclusive. `None` when no sample falls
    /// inside the window.
    pub fn window_around(&self, center: Timestamp, half_width: f64) -> Option<(usize, usize)> {
        let lo = center - half_width;
        let hi = center + half_width;
        let start = self.samples.partition_point(|s| s.timestamp < lo);
        let end = self.samples.partition_point(|s| s.timestamp <= hi);
        if start < end {
            Some((start, end))
        } else {
            None
        }
    }

    /// Samples within `half_width` seconds of `center`.
    pub fn slice_around(&self, center: Timestamp, half_width: f64) -> &[Sample] {
        match self.window_around(center, half_width) {
            Some((start, end)) => &self.samples[start..end],
            None => &[],
        }
    }

    /// The samples covering the trailing `duration` seconds, measured back
    /// from the most recent timestamp.
    ///
    /// Returns `None` when the series does not span the full duration: the
    /// window must have a sample at or before its start for the slice to
    /// represent `duration` seconds of signal. The slice includes that
    /// boundary sample.
    pub fn trailing(&self, duration: f64) -> Option<&[Sample]> {
        let now = self.last_timestamp()?;
        let window_start = now - duration;
        // Index of the first sample strictly inside the window
        let inside = self.samples.partition_point(|s| s.timestamp < window_start);
        if inside == 0 && self.samples[0].timestamp > window_start {
            return None; // series younger than the window
        }
        // Step back one to include a boundary straddler, unless a sample
        // sits exactly on the window start already
        let start = if inside > 0 && self.samples[inside].timestamp > window_start {
            inside - 1
        } else {
            inside
        };
        Some(&self.samples[start..])
    }

    /// Samples at or after `from`, oldest first.
    pub fn since(&self, from: Timestamp) -> &[Sample] {
        let start = self.samples.partition_point(|s| s.timestamp < from);
        &self.samples[start..]
    }

    /// Drop all samples, starting a fresh session for this channel.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_1hz(values: &[f64]) -> TimeSeries {
        let mut s = TimeSeries::new();
        for (i, v) in values.iter().enumerate() {
            s.push(Sample::new(i as f64, *v));
        }
        s
    }

    #[test]
    fn empty_series() {
        let s = TimeSeries::new();
        assert!(s.is_empty());
        assert!(s.last().is_none());
        assert!(s.trailing(10.0).is_none());
        assert!(s.window_around(5.0, 2.0).is_none());
    }

    #[test]
    fn tail_shorter_than_series() {
        let s = series_1hz(&[1.0, 2.0, 3.0]);
        assert_eq!(s.tail(10).len(), 3);
        assert_eq!(s.tail(2).len(), 2);
        assert_eq!(s.tail(2)[0].value, 2.0);
    }

    #[test]
    fn window_around_bounds() {
        let s = series_1hz(&[0.0; 20]); // t = 0..19
        let (start, end) = s.window_around(10.0, 2.5).unwrap();
        // samples at t = 8, 9, 10, 11, 12
        assert_eq!((start, end), (8, 13));

        // window entirely before the data
        assert!(s.window_around(-10.0, 2.0).is_none());
    }

    #[test]
    fn trailing_requires_full_coverage() {
        let s = series_1hz(&[0.0; 30]); // spans 29 s
        assert!(s.trailing(60.0).is_none());

        let w = s.trailing(10.0).unwrap();
        // t = 19..=29: boundary sample at exactly now - duration is included
        assert_eq!(w.first().unwrap().timestamp, 19.0);
        assert_eq!(w.last().unwrap().timestamp, 29.0);
    }

    #[test]
    fn trailing_includes_boundary_straddler() {
        let mut s = TimeSeries::new();
        for t in [0.0, 4.0, 9.5, 14.0, 20.0] {
            s.push(Sample::new(t, 1.0));
        }
        // window start at 20 - 12 = 8; sample at 4.0 straddles the boundary
        let w = s.trailing(12.0).unwrap();
        assert_eq!(w.first().unwrap().timestamp, 4.0);
    }

    #[test]
    fn since_partitions() {
        let s = series_1hz(&[0.0; 10]);
        assert_eq!(s.since(7.0).len(), 3);
        assert_eq!(s.since(100.0).len(), 0);
    }

    #[test]
    fn clear_resets() {
        let mut s = series_1hz(&[1.0, 2.0]);
        s.clear();
        assert!(s.is_empty());
    }
}
