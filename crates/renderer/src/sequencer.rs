/// A single frame to render: its position in the output and the shader time
/// it samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameJob {
    pub index: u32,
    pub simulated_time: f64,
}

/// Simulated time for `frame_index`, spreading `total_frames` evenly over
/// `[0, desired_duration * slowdown_factor]`.
///
/// The first frame samples `0.0` and the last samples the full span exactly.
/// A single-frame render samples `0.0`.
pub fn simulated_time(
    frame_index: u32,
    total_frames: u32,
    desired_duration: f64,
    slowdown_factor: f64,
) -> f64 {
    if total_frames <= 1 {
        return 0.0;
    }
    let progress = f64::from(frame_index) / f64::from(total_frames - 1);
    progress * desired_duration * slowdown_factor
}

/// Lazily yields [`FrameJob`]s in ascending index order.
///
/// The sequence is a plain value: cloning it restarts from the same position.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    next: u32,
    total_frames: u32,
    desired_duration: f64,
    slowdown_factor: f64,
}

impl FrameSequence {
    pub fn new(total_frames: u32, desired_duration: f64, slowdown_factor: f64) -> Self {
        Self {
            next: 0,
            total_frames,
            desired_duration,
            slowdown_factor,
        }
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }
}

impl Iterator for FrameSequence {
    type Item = FrameJob;

    fn next(&mut self) -> Option<FrameJob> {
        if self.next >= self.total_frames {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(FrameJob {
            index,
            simulated_time: simulated_time(
                index,
                self.total_frames,
                self.desired_duration,
                self.slowdown_factor,
            ),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_frames - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FrameSequence {}

impl std::iter::FusedIterator for FrameSequence {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_cover_the_full_span() {
        assert_eq!(simulated_time(0, 1800, 30.0, 1.0), 0.0);
        assert_eq!(simulated_time(1799, 1800, 30.0, 1.0), 30.0);
        assert_eq!(simulated_time(1799, 1800, 30.0, 0.5), 15.0);
    }

    #[test]
    fn single_frame_samples_zero() {
        assert_eq!(simulated_time(0, 1, 30.0, 2.0), 0.0);
    }

    #[test]
    fn three_frames_over_two_seconds() {
        let times: Vec<f64> = FrameSequence::new(3, 2.0, 1.0)
            .map(|job| job.simulated_time)
            .collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn zero_duration_or_slowdown_freezes_time() {
        assert!(FrameSequence::new(4, 0.0, 1.0).all(|job| job.simulated_time == 0.0));
        assert!(FrameSequence::new(4, 10.0, 0.0).all(|job| job.simulated_time == 0.0));
    }

    #[test]
    fn sequence_is_ordered_and_restartable() {
        let sequence = FrameSequence::new(5, 4.0, 1.0);
        assert_eq!(sequence.len(), 5);

        let first: Vec<FrameJob> = sequence.clone().collect();
        let second: Vec<FrameJob> = sequence.collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0].index + 1 == pair[1].index));
        assert!(first
            .windows(2)
            .all(|pair| pair[0].simulated_time <= pair[1].simulated_time));
    }

    #[test]
    fn empty_sequence_yields_nothing() {
        assert_eq!(FrameSequence::new(0, 1.0, 1.0).count(), 0);
    }
}
