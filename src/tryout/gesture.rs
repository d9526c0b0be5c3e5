use image::{imageops, DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::presentation::ConfirmInput;
use crate::services::camera::Camera;

/// Working resolution for frame differencing.
const TRACK_WIDTH: u32 = 80;
const TRACK_HEIGHT: u32 = 60;
/// Per-pixel luma delta that counts as change.
const DIFF_THRESHOLD: u8 = 30;
/// Fewer changed pixels than this is treated as sensor noise.
const MIN_CHANGED_PIXELS: usize = 12;

pub const DEFAULT_WINDOW: usize = 8;
pub const DEFAULT_DOMINANCE: f32 = 2.0;
/// Mean per-sample movement, as a fraction of the frame.
pub const DEFAULT_MIN_MAGNITUDE: f32 = 0.02;

/// The viewer's answer to "save this look?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
}

/// Movement of the motion centroid between two frames, normalised to the
/// frame size (x right, y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub dx: f32,
    pub dy: f32,
}

impl MotionSample {
    pub fn magnitude(&self) -> f32 {
        self.dx.hypot(self.dy)
    }
}

/// Turns a stream of camera frames into centroid motion samples.
pub struct MotionTracker {
    previous: Option<GrayImage>,
    last_centroid: Option<(f32, f32)>,
}

impl Default for MotionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionTracker {
    pub fn new() -> Self {
        Self {
            previous: None,
            last_centroid: None,
        }
    }

    pub fn observe(&mut self, frame: &DynamicImage) -> Option<MotionSample> {
        self.observe_gray(frame.to_luma8())
    }

    /// Feed one frame. Needs three frames with movement before the first sample.
    pub fn observe_gray(&mut self, frame: GrayImage) -> Option<MotionSample> {
        let frame = if frame.dimensions() == (TRACK_WIDTH, TRACK_HEIGHT) {
            frame
        } else {
            imageops::resize(&frame, TRACK_WIDTH, TRACK_HEIGHT, imageops::FilterType::Triangle)
        };

        let previous = self.previous.replace(frame)?;
        let current = self.previous.as_ref()?;

        let Some(centroid) = motion_centroid(&previous, current) else {
            // Still scene: the next movement starts a new trail.
            self.last_centroid = None;
            return None;
        };

        let sample = self.last_centroid.map(|(x, y)| MotionSample {
            dx: centroid.0 - x,
            dy: centroid.1 - y,
        });
        self.last_centroid = Some(centroid);
        sample
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.last_centroid = None;
    }
}

/// Poll `camera` every `interval` and forward motion samples as confirm input.
///
/// Samples are dropped while the presenter isn't reading; it discards stale
/// input anyway. The camera is released when the task ends.
pub fn spawn_gesture_feed(
    camera: Arc<dyn Camera>,
    interval: Duration,
    tx: mpsc::Sender<ConfirmInput>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = camera.start().await {
            tracing::warn!(error = %e, "Gesture camera unavailable, gestures disabled");
            return;
        }
        let mut tracker = MotionTracker::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            let frame = match camera.snapshot().await {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(error = %e, "Gesture frame unavailable");
                    tracker.reset();
                    continue;
                }
            };
            let Ok(decoded) = image::load_from_memory(&frame.bytes) else {
                tracker.reset();
                continue;
            };
            if let Some(sample) = tracker.observe(&decoded) {
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    tx.try_send(ConfirmInput::Motion(sample))
                {
                    break;
                }
            }
        }

        camera.stop().await;
        tracing::debug!("Gesture feed stopped");
    })
}

/// Normalised centroid of pixels whose luma changed between two frames.
fn motion_centroid(a: &GrayImage, b: &GrayImage) -> Option<(f32, f32)> {
    let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0usize);
    for (x, y, pixel) in b.enumerate_pixels() {
        let before = a.get_pixel(x, y)[0];
        if pixel[0].abs_diff(before) > DIFF_THRESHOLD {
            sum_x += u64::from(x);
            sum_y += u64::from(y);
            count += 1;
        }
    }
    if count < MIN_CHANGED_PIXELS {
        return None;
    }
    let n = count as f32;
    Some((
        sum_x as f32 / n / b.width() as f32,
        sum_y as f32 / n / b.height() as f32,
    ))
}

/// Sliding-window nod/shake classifier.
///
/// A verdict needs a full window whose travel along one axis is at least
/// `dominance` times the other and whose mean step exceeds `min_magnitude`.
/// Vertical movement is a nod (yes), horizontal a shake (no).
pub struct GestureClassifier {
    window: VecDeque<MotionSample>,
    size: usize,
    dominance: f32,
    min_magnitude: f32,
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_DOMINANCE, DEFAULT_MIN_MAGNITUDE)
    }
}

impl GestureClassifier {
    pub fn new(size: usize, dominance: f32, min_magnitude: f32) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
            dominance,
            min_magnitude,
        }
    }

    pub fn push(&mut self, sample: MotionSample) -> Option<Answer> {
        if self.window.len() == self.size {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let verdict = self.classify();
        if verdict.is_some() {
            self.window.clear();
        }
        verdict
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn classify(&self) -> Option<Answer> {
        if self.window.len() < self.size {
            return None;
        }
        let n = self.window.len() as f32;
        let mean = self.window.iter().map(MotionSample::magnitude).sum::<f32>() / n;
        if mean < self.min_magnitude {
            return None;
        }

        let travel_x: f32 = self.window.iter().map(|s| s.dx.abs()).sum();
        let travel_y: f32 = self.window.iter().map(|s| s.dy.abs()).sum();
        if travel_y >= self.dominance * travel_x {
            Some(Answer::Yes)
        } else if travel_x >= self.dominance * travel_y {
            Some(Answer::No)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn oscillate(dx: f32, dy: f32, n: usize) -> Vec<MotionSample> {
        (0..n)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                MotionSample {
                    dx: dx * sign,
                    dy: dy * sign,
                }
            })
            .collect()
    }

    fn feed(classifier: &mut GestureClassifier, samples: Vec<MotionSample>) -> Option<Answer> {
        samples.into_iter().filter_map(|s| classifier.push(s)).last()
    }

    #[test]
    fn test_nod_is_yes() {
        let mut classifier = GestureClassifier::default();
        assert_eq!(feed(&mut classifier, oscillate(0.01, 0.1, 8)), Some(Answer::Yes));
    }

    #[test]
    fn test_shake_is_no() {
        let mut classifier = GestureClassifier::default();
        assert_eq!(feed(&mut classifier, oscillate(0.1, 0.005, 8)), Some(Answer::No));
    }

    #[test]
    fn test_needs_full_window() {
        let mut classifier = GestureClassifier::default();
        assert_eq!(feed(&mut classifier, oscillate(0.0, 0.1, 7)), None);
        assert_eq!(classifier.push(MotionSample { dx: 0.0, dy: 0.1 }), Some(Answer::Yes));
    }

    #[test]
    fn test_diagonal_and_jitter_are_ignored() {
        let mut classifier = GestureClassifier::default();
        assert_eq!(feed(&mut classifier, oscillate(0.1, 0.1, 16)), None);

        classifier.reset();
        assert_eq!(feed(&mut classifier, oscillate(0.0, 0.001, 16)), None);
    }

    fn frame_with_block(top: u32) -> GrayImage {
        let mut frame = GrayImage::new(TRACK_WIDTH, TRACK_HEIGHT);
        for y in top..top + 10 {
            for x in 35..45 {
                frame.put_pixel(x, y, Luma([255]));
            }
        }
        frame
    }

    #[test]
    fn test_tracker_follows_vertical_motion() {
        let mut tracker = MotionTracker::new();
        assert!(tracker.observe_gray(frame_with_block(5)).is_none());
        assert!(tracker.observe_gray(frame_with_block(20)).is_none());

        let sample = tracker.observe_gray(frame_with_block(35)).unwrap();
        assert!(sample.dy > 0.2, "dy = {}", sample.dy);
        assert!(sample.dx.abs() < 0.01, "dx = {}", sample.dx);
    }

    #[test]
    fn test_tracker_ignores_still_scene() {
        let mut tracker = MotionTracker::new();
        for _ in 0..4 {
            assert!(tracker.observe_gray(frame_with_block(10)).is_none());
        }
    }

    struct MovingBlockCamera {
        frame: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Camera for MovingBlockCamera {
        async fn start(&self) -> Result<(), crate::services::camera::CameraError> {
            Ok(())
        }
        async fn snapshot(
            &self,
        ) -> Result<crate::services::image_ref::ImageData, crate::services::camera::CameraError> {
            let n = self.frame.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let top = [5, 20, 35, 20][n % 4];
            let mut png = std::io::Cursor::new(Vec::new());
            DynamicImage::ImageLuma8(frame_with_block(top))
                .write_to(&mut png, image::ImageFormat::Png)
                .unwrap();
            Ok(crate::services::image_ref::ImageData::new(png.into_inner(), "image/png"))
        }
        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn test_gesture_feed_emits_motion() {
        let camera = Arc::new(MovingBlockCamera {
            frame: std::sync::atomic::AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let (stop, shutdown) = watch::channel(false);
        let handle = spawn_gesture_feed(camera, Duration::from_millis(5), tx, shutdown);

        let input = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let ConfirmInput::Motion(sample) = input else {
            panic!("expected motion, got {input:?}");
        };
        assert!(sample.dy > 0.0);

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_tracker_rescales_frames() {
        let mut tracker = MotionTracker::new();
        let big = DynamicImage::ImageLuma8(GrayImage::new(320, 240));
        assert!(tracker.observe(&big).is_none());
        assert!(tracker.observe(&big).is_none());
    }
}
