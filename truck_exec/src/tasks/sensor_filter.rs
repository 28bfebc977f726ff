//! # Sensor filter task
//!
//! Consumes raw telemetry frames from the bus, batches them in the raw
//! queue, and turns every full batch into one averaged [`FilteredPose`]
//! which lands on the blackboard and in the filtered queue for the route
//! planner.
//!
//! The raw queue uses the reject policy: the producing and consuming stages
//! are the same thread, so the moment a push fills the buffer the whole
//! batch is drained, parsed and averaged. Frames that fail to parse, or that
//! belong to another truck, are skipped; an empty batch produces nothing.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Internal
use comms_if::{
    msg::RawSensorFrame,
    net::{BusClient, QoS},
    topics,
};
use util::session;

use crate::blackboard::{Blackboard, FilteredPose};
use crate::bounded_buffer::{BoundedBuffer, OverflowPolicy, SignalledBuffer};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Sensor filter parameters, loaded from `params/sensor_filter.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Number of raw frames averaged into one filtered record.
    pub batch_size: usize,

    /// Bus receive timeout, bounding the stop-flag check period, in
    /// milliseconds.
    pub recv_timeout_ms: u64,
}

/// Everything the task needs, passed in by `main`.
pub struct SensorFilterCtx {
    pub params: Params,
    pub truck_id: u32,
    pub bus: BusClient,
    pub blackboard: Arc<Blackboard>,
    pub filtered_queue: Arc<SignalledBuffer<FilteredPose>>,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(mut ctx: SensorFilterCtx) {
    info!("SensorFilter started (batch size {})", ctx.params.batch_size);

    let raw_topic = topics::sensor_raw(ctx.truck_id);
    if let Err(e) = ctx.bus.subscribe(&raw_topic, QoS::AtLeastOnce) {
        error!("SensorFilter could not subscribe to {}: {}", raw_topic, e);
        return;
    }

    // Raw frames are stored unparsed together with their arrival time so the
    // batch stamp can be the mean arrival instant.
    let mut batch: BoundedBuffer<(String, f64)> =
        BoundedBuffer::new(ctx.params.batch_size, OverflowPolicy::Reject);

    let recv_timeout = Duration::from_millis(ctx.params.recv_timeout_ms);

    while !ctx.stop.load(Ordering::Relaxed) {
        let msg = match ctx.bus.recv_timeout(recv_timeout) {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                error!("SensorFilter lost the bus, stopping: {}", e);
                break;
            }
        };

        let text = match String::from_utf8(msg.payload) {
            Ok(t) => t,
            Err(_) => {
                warn!("Dropping a non UTF-8 raw frame");
                continue;
            }
        };

        if batch
            .push((text, session::get_elapsed_seconds()))
            .is_err()
        {
            // The batch is drained the moment it fills, so a rejected push
            // means the drain below was skipped somehow.
            util::raise_error!("Raw batch queue rejected a frame before drain");
        }

        if batch.is_full() {
            let items: Vec<(String, f64)> = std::iter::from_fn(|| batch.pop()).collect();

            if let Some((pose, sample_count)) = average_batch(&items, ctx.truck_id) {
                let stamped = {
                    let mut bb = ctx.blackboard.lock();
                    bb.set_filtered_pose(pose)
                };
                ctx.blackboard.notify_all();

                // The blackboard guard is dropped above before this lock is
                // taken; no call path in the process holds both.
                {
                    let mut queue = ctx.filtered_queue.lock();
                    queue.push(stamped).ok();
                }
                ctx.filtered_queue.notify_all();

                debug!(
                    "Filtered record {} produced from {} samples",
                    stamped.seq, sample_count
                );
            }
        }
    }

    ctx.bus.disconnect();
    info!("SensorFilter stopped");
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Average a drained batch into one filtered pose.
///
/// Every numeric field is the arithmetic mean over the valid frames, rounded
/// to three decimals; the stamp is the mean arrival time. Returns the record
/// and the number of frames that contributed, or `None` if nothing in the
/// batch was usable.
fn average_batch(items: &[(String, f64)], truck_id: u32) -> Option<(FilteredPose, usize)> {
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_heading = 0.0;
    let mut sum_temperature = 0.0;
    let mut sum_arrival_s = 0.0;
    let mut count = 0usize;

    for (json, arrival_s) in items {
        match RawSensorFrame::from_json(json) {
            Ok(frame) => {
                if !frame.truck_id.matches(truck_id) {
                    debug!("Skipping a frame for another truck");
                    continue;
                }

                sum_x += frame.i_posicao_x;
                sum_y += frame.i_posicao_y;
                sum_heading += frame.i_angulo_x;
                sum_temperature += frame.i_temperatura;
                sum_arrival_s += arrival_s;
                count += 1;
            }
            Err(e) => {
                warn!("Skipping a malformed raw frame: {}", e);
            }
        }
    }

    if count == 0 {
        return None;
    }

    let n = count as f64;
    Some((
        FilteredPose {
            x_m: round3(sum_x / n),
            y_m: round3(sum_y / n),
            heading_deg: round3(sum_heading / n),
            temperature_c: round3(sum_temperature / n),
            stamp_s: sum_arrival_s / n,
            seq: 0,
        },
        count,
    ))
}

/// Round to three decimal places.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn frame(truck_id: u32, x: f64, y: f64, ang: f64, temp: f64) -> String {
        format!(
            r#"{{"truck_id": {}, "i_posicao_x": {}, "i_posicao_y": {}, "i_angulo_x": {}, "i_temperatura": {}}}"#,
            truck_id, x, y, ang, temp
        )
    }

    #[test]
    fn test_batch_mean_over_ten_frames() {
        // Frames x = 0..9, y = 0, ang = 0, temp = 70 average to x = 4.5
        let items: Vec<(String, f64)> = (0..10)
            .map(|i| (frame(1, i as f64, 0.0, 0.0, 70.0), i as f64))
            .collect();

        let (pose, count) = average_batch(&items, 1).unwrap();
        assert_eq!(count, 10);
        assert_eq!(pose.x_m, 4.5);
        assert_eq!(pose.y_m, 0.0);
        assert_eq!(pose.heading_deg, 0.0);
        assert_eq!(pose.temperature_c, 70.0);
        assert_eq!(pose.stamp_s, 4.5);
    }

    #[test]
    fn test_mean_rounds_to_three_decimals() {
        let items: Vec<(String, f64)> = (0..3)
            .map(|i| (frame(1, 1.0, 0.0, 0.0, 70.0 + i as f64), 0.0))
            .collect();

        // Temperatures 70, 71, 72 -> 71.0; headings stay 0; x mean of 1/1/1
        let (pose, _) = average_batch(&items, 1).unwrap();
        assert_eq!(pose.temperature_c, 71.0);

        // 0.1 + 0.2 + 0.3 over 3 = 0.2 exactly after rounding
        let items: Vec<(String, f64)> = [0.1, 0.2, 0.3]
            .iter()
            .map(|x| (frame(1, *x, 0.0, 0.0, 0.0), 0.0))
            .collect();
        let (pose, _) = average_batch(&items, 1).unwrap();
        assert_eq!(pose.x_m, 0.2);

        // A mean of 1/3 rounds to 0.333
        let items: Vec<(String, f64)> = [0.0, 0.0, 1.0]
            .iter()
            .map(|x| (frame(1, *x, 0.0, 0.0, 0.0), 0.0))
            .collect();
        let (pose, _) = average_batch(&items, 1).unwrap();
        assert_eq!(pose.x_m, 0.333);
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let items = vec![
            (frame(1, 2.0, 0.0, 0.0, 70.0), 0.0),
            ("not json at all".to_string(), 1.0),
            (frame(1, 4.0, 0.0, 0.0, 70.0), 2.0),
        ];

        let (pose, count) = average_batch(&items, 1).unwrap();
        assert_eq!(count, 2);
        assert_eq!(pose.x_m, 3.0);
    }

    #[test]
    fn test_other_trucks_are_filtered_out() {
        let items = vec![
            (frame(1, 2.0, 0.0, 0.0, 70.0), 0.0),
            (frame(2, 100.0, 100.0, 90.0, 200.0), 0.0),
        ];

        let (pose, count) = average_batch(&items, 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(pose.x_m, 2.0);
    }

    #[test]
    fn test_empty_batch_yields_nothing() {
        assert!(average_batch(&[], 1).is_none());

        let items = vec![("garbage".to_string(), 0.0)];
        assert!(average_batch(&items, 1).is_none());
    }
}
