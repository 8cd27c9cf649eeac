//! The recognition loop: throttled detect → extract → match over a live
//! frame source, publishing decisions and display frames.

use crate::board::{DecisionBoard, FrameBuffer};
use crate::decision::{Decision, Verdict};
use crate::detector::FaceDetector;
use crate::extractor::SignatureExtractor;
use crate::gallery::SignatureStore;
use crate::matcher::{MatchResult, Matcher};
use crate::overlay::{self, AnnotatedFrame, RegionClass};
use crate::source::{CaptureError, Frame, FrameSource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Runs the expensive path on every Nth captured frame.
#[derive(Debug, Clone)]
pub struct Throttle {
    every: u32,
    counter: u32,
}

impl Throttle {
    /// `every` of zero is treated as one.
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            counter: 0,
        }
    }

    /// True for captured frames 0, N, 2N, ...
    pub fn tick(&mut self) -> bool {
        let due = self.counter == 0;
        self.counter = (self.counter + 1) % self.every;
        due
    }

    pub fn every(&self) -> u32 {
        self.every
    }
}

/// Counters kept across the life of a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames_captured: u64,
    pub frames_evaluated: u64,
    pub approvals: u64,
    pub unknowns: u64,
    pub no_face: u64,
    pub no_enrolled: u64,
    pub extraction_failures: u64,
    pub detector_failures: u64,
}

/// Result of one evaluated frame.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: Decision,
    pub frame: AnnotatedFrame,
}

/// Single producer that keeps the decision board current.
pub struct RecognitionLoop<D, E, M> {
    detector: D,
    extractor: E,
    matcher: M,
    gallery: Arc<SignatureStore>,
    tolerance: f32,
    throttle: Throttle,
    board: Arc<DecisionBoard>,
    frames: Arc<FrameBuffer>,
    stats: LoopStats,
    last_verdict: Option<Verdict>,
}

impl<D, E, M> RecognitionLoop<D, E, M>
where
    D: FaceDetector,
    E: SignatureExtractor,
    M: Matcher,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        detector: D,
        extractor: E,
        matcher: M,
        gallery: Arc<SignatureStore>,
        tolerance: f32,
        throttle: Throttle,
        board: Arc<DecisionBoard>,
        frames: Arc<FrameBuffer>,
    ) -> Self {
        Self {
            detector,
            extractor,
            matcher,
            gallery,
            tolerance,
            throttle,
            board,
            frames,
            stats: LoopStats::default(),
            last_verdict: None,
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Pull frames until `stop` is raised or the source fails.
    ///
    /// A capture failure ends the loop. The board is closed on every exit.
    pub fn run<S: FrameSource>(
        &mut self,
        source: &mut S,
        stop: &AtomicBool,
    ) -> Result<LoopStats, LoopError> {
        tracing::info!(
            every = self.throttle.every(),
            tolerance = self.tolerance,
            enrolled = self.gallery.len(),
            "recognition loop started"
        );

        let result = loop {
            if stop.load(Ordering::Acquire) {
                break Ok(());
            }
            match source.next_frame() {
                Ok(frame) => self.step(frame),
                Err(e) => break Err(e),
            }
        };

        self.board.close();

        match result {
            Ok(()) => {
                tracing::info!(stats = ?self.stats, "recognition loop stopped");
                Ok(self.stats.clone())
            }
            Err(e) => {
                tracing::error!(error = %e, stats = ?self.stats, "recognition loop terminated");
                Err(e.into())
            }
        }
    }

    /// Handle one captured frame: evaluate it if the throttle allows,
    /// otherwise pass it through for display.
    pub fn step(&mut self, frame: Frame) {
        self.stats.frames_captured += 1;

        if !self.throttle.tick() {
            self.publish_passthrough(frame);
            return;
        }

        if self.gallery.is_empty() {
            self.stats.frames_evaluated += 1;
            self.stats.no_enrolled += 1;
            self.record(Decision::now(Verdict::NoEnrolled));
            self.publish_passthrough(frame);
            return;
        }

        match self.evaluate(&frame) {
            Some(evaluation) => {
                self.record(evaluation.decision);
                self.frames.publish(Arc::new(evaluation.frame));
            }
            None => self.publish_passthrough(frame),
        }
    }

    /// Run detect → extract → match on `frame` against a non-empty gallery.
    ///
    /// Returns `None` when detection itself failed; the previous decision
    /// then stays current.
    pub fn evaluate(&mut self, frame: &Frame) -> Option<Evaluation> {
        let regions = match self.detector.detect(frame) {
            Ok(regions) => regions,
            Err(e) => {
                self.stats.detector_failures += 1;
                tracing::warn!(error = %e, seq = frame.sequence, "face detection failed; frame skipped");
                return None;
            }
        };
        self.stats.frames_evaluated += 1;

        if regions.is_empty() {
            self.stats.no_face += 1;
            let decision = Decision::now(Verdict::NoFace);
            let annotated = overlay::annotate(frame, &[], &[], Some(decision.clone()));
            return Some(Evaluation {
                decision,
                frame: annotated,
            });
        }

        let signatures = self.extractor.extract(frame, &regions);
        let mut classes = vec![RegionClass::Pending; regions.len()];
        let mut verdict = Verdict::Unknown;

        for (index, (region, signature)) in regions.iter().zip(signatures).enumerate() {
            let signature = match signature {
                Ok(signature) => signature,
                Err(e) => {
                    self.stats.extraction_failures += 1;
                    tracing::debug!(
                        error = %e,
                        index,
                        width = region.width(),
                        height = region.height(),
                        "signature extraction failed for region"
                    );
                    continue;
                }
            };

            match self.matcher.compare(&signature, &self.gallery, self.tolerance) {
                MatchResult::Approved { identity, distance } => {
                    tracing::debug!(%identity, distance, index, "region matched");
                    classes[index] = RegionClass::Approved {
                        identity: identity.clone(),
                    };
                    verdict = Verdict::Approved { identity };
                    break;
                }
                MatchResult::Unknown { nearest } => {
                    tracing::debug!(?nearest, index, "region unmatched");
                    classes[index] = RegionClass::Unknown;
                }
            }
        }

        match &verdict {
            Verdict::Approved { .. } => self.stats.approvals += 1,
            _ => self.stats.unknowns += 1,
        }

        let decision = Decision::now(verdict);
        let annotated = overlay::annotate(frame, &regions, &classes, Some(decision.clone()));
        Some(Evaluation {
            decision,
            frame: annotated,
        })
    }

    /// Write the board and log transitions.
    fn record(&mut self, decision: Decision) {
        let changed = self.last_verdict.as_ref() != Some(&decision.verdict);
        match &decision.verdict {
            Verdict::Approved { identity } => {
                tracing::info!(%identity, at = %decision.captured_at.format("%H:%M:%S"), "APPROVED - access granted");
            }
            Verdict::Unknown if changed => {
                tracing::info!(at = %decision.captured_at.format("%H:%M:%S"), "UNKNOWN face - access denied");
            }
            Verdict::NoEnrolled if changed => {
                tracing::info!("no enrolled faces; recognition skipped until a gallery is loaded");
            }
            Verdict::NoFace if changed => tracing::debug!("no face in view"),
            _ => {}
        }

        self.last_verdict = Some(decision.verdict.clone());
        self.board.write(decision);
    }

    fn publish_passthrough(&self, frame: Frame) {
        self.frames
            .publish(Arc::new(AnnotatedFrame::passthrough(frame.image, frame.sequence)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardState;
    use crate::detector::DetectorError;
    use crate::extractor::ExtractionError;
    use crate::matcher::{FirstMatch, DEFAULT_TOLERANCE};
    use crate::types::{FaceRegion, Signature};
    use image::RgbImage;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn sig(values: &[f32]) -> Signature {
        Signature::new(values.to_vec()).unwrap()
    }

    fn frame(sequence: u32) -> Frame {
        Frame::new(RgbImage::new(160, 120), sequence)
    }

    fn region(left: u32) -> FaceRegion {
        FaceRegion::new(10, left + 40, 90, left)
    }

    /// Returns the same regions for every frame and counts calls.
    struct FixedDetector {
        regions: Vec<FaceRegion>,
        calls: Rc<Cell<usize>>,
        fail: bool,
    }

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(DetectorError::InferenceFailed("boom".into()));
            }
            Ok(self.regions.clone())
        }
    }

    /// Hands out a fixed signature per region index; `None` fails that region.
    struct FixedExtractor {
        signatures: Vec<Option<Signature>>,
    }

    impl SignatureExtractor for FixedExtractor {
        fn extract(
            &mut self,
            _frame: &Frame,
            regions: &[FaceRegion],
        ) -> Vec<Result<Signature, ExtractionError>> {
            regions
                .iter()
                .zip(&self.signatures)
                .map(|(r, s)| {
                    s.clone().ok_or(ExtractionError::DegenerateRegion {
                        width: r.width(),
                        height: r.height(),
                    })
                })
                .collect()
        }
    }

    /// Counts `compare` calls while delegating to first-match.
    struct CountingMatcher {
        calls: Rc<Cell<usize>>,
    }

    impl Matcher for CountingMatcher {
        fn compare(&self, probe: &Signature, gallery: &SignatureStore, tolerance: f32) -> MatchResult {
            self.calls.set(self.calls.get() + 1);
            FirstMatch.compare(probe, gallery, tolerance)
        }
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Frame, CaptureError>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CaptureError> {
            self.frames
                .pop_front()
                .unwrap_or_else(|| Err(CaptureError::DeviceUnavailable("end of script".into())))
        }
    }

    struct Harness {
        lp: RecognitionLoop<FixedDetector, FixedExtractor, CountingMatcher>,
        board: Arc<DecisionBoard>,
        frames: Arc<FrameBuffer>,
        detect_calls: Rc<Cell<usize>>,
        match_calls: Rc<Cell<usize>>,
    }

    fn harness(
        gallery: SignatureStore,
        regions: Vec<FaceRegion>,
        signatures: Vec<Option<Signature>>,
        every: u32,
    ) -> Harness {
        let board = Arc::new(DecisionBoard::new());
        let frames = Arc::new(FrameBuffer::new());
        let detect_calls = Rc::new(Cell::new(0));
        let match_calls = Rc::new(Cell::new(0));
        let lp = RecognitionLoop::new(
            FixedDetector {
                regions,
                calls: Rc::clone(&detect_calls),
                fail: false,
            },
            FixedExtractor { signatures },
            CountingMatcher {
                calls: Rc::clone(&match_calls),
            },
            Arc::new(gallery),
            DEFAULT_TOLERANCE,
            Throttle::new(every),
            Arc::clone(&board),
            Arc::clone(&frames),
        );
        Harness {
            lp,
            board,
            frames,
            detect_calls,
            match_calls,
        }
    }

    /// Gallery = {"alice": origin} in two dimensions.
    fn alice_gallery() -> SignatureStore {
        SignatureStore::from_entries([("alice", sig(&[0.0, 0.0]))]).unwrap()
    }

    fn current_verdict(board: &DecisionBoard) -> Option<Verdict> {
        board.read().state.decision().map(|d| d.verdict.clone())
    }

    #[test]
    fn test_throttle_cadence() {
        let mut t = Throttle::new(3);
        let ticks: Vec<bool> = (0..7).map(|_| t.tick()).collect();
        assert_eq!(ticks, vec![true, false, false, true, false, false, true]);
        let mut every_frame = Throttle::new(0);
        assert!((0..5).all(|_| every_frame.tick()));
    }

    #[test]
    fn test_scenario_a_close_probe_is_approved() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![Some(sig(&[0.3, 0.0]))], 1);
        h.lp.step(frame(0));
        assert_eq!(
            current_verdict(&h.board),
            Some(Verdict::Approved { identity: "alice".into() })
        );
        assert_eq!(h.lp.stats().approvals, 1);
    }

    #[test]
    fn test_scenario_b_far_probe_is_unknown() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![Some(sig(&[0.9, 0.0]))], 1);
        h.lp.step(frame(0));
        assert_eq!(current_verdict(&h.board), Some(Verdict::Unknown));
        let latest = h.frames.latest().unwrap();
        assert_eq!(latest.overlays[0].class, RegionClass::Unknown);
    }

    #[test]
    fn test_scenario_c_empty_gallery_is_no_enrolled() {
        let mut h = harness(
            SignatureStore::default(),
            vec![region(0)],
            vec![Some(sig(&[0.0, 0.0]))],
            1,
        );
        for seq in 0..3 {
            h.lp.step(frame(seq));
        }
        assert_eq!(current_verdict(&h.board), Some(Verdict::NoEnrolled));
        assert_eq!(h.detect_calls.get(), 0, "detection must be skipped");
        assert_eq!(h.match_calls.get(), 0, "matcher must never run");
        // Liveness: one write per evaluated frame.
        assert_eq!(h.board.read().generation, 3);
    }

    #[test]
    fn test_scenario_d_no_regions_is_no_face() {
        let mut h = harness(alice_gallery(), vec![], vec![], 1);
        h.lp.step(frame(0));
        assert_eq!(current_verdict(&h.board), Some(Verdict::NoFace));
        assert_eq!(h.match_calls.get(), 0);
        assert!(h.frames.latest().unwrap().overlays.is_empty());
    }

    #[test]
    fn test_first_approving_face_short_circuits() {
        let gallery = SignatureStore::from_entries([
            ("alice", sig(&[0.0, 0.0])),
            ("bob", sig(&[5.0, 0.0])),
        ])
        .unwrap();
        let mut h = harness(
            gallery,
            vec![region(0), region(50), region(100)],
            vec![
                Some(sig(&[9.0, 9.0])),
                Some(sig(&[5.1, 0.0])),
                Some(sig(&[0.0, 0.1])),
            ],
            1,
        );
        h.lp.step(frame(0));

        assert_eq!(
            current_verdict(&h.board),
            Some(Verdict::Approved { identity: "bob".into() })
        );
        assert_eq!(h.match_calls.get(), 2, "third face must not be matched");
        let classes: Vec<_> = h
            .frames
            .latest()
            .unwrap()
            .overlays
            .iter()
            .map(|o| o.class.clone())
            .collect();
        assert_eq!(
            classes,
            vec![
                RegionClass::Unknown,
                RegionClass::Approved { identity: "bob".into() },
                RegionClass::Pending,
            ]
        );
    }

    #[test]
    fn test_failed_extraction_is_pending_and_skipped() {
        let mut h = harness(
            alice_gallery(),
            vec![region(0), region(50)],
            vec![None, Some(sig(&[0.1, 0.0]))],
            1,
        );
        h.lp.step(frame(0));
        assert_eq!(
            current_verdict(&h.board),
            Some(Verdict::Approved { identity: "alice".into() })
        );
        assert_eq!(h.lp.stats().extraction_failures, 1);
        let overlays = &h.frames.latest().unwrap().overlays;
        assert_eq!(overlays[0].class, RegionClass::Pending);
        assert!(matches!(overlays[1].class, RegionClass::Approved { .. }));
    }

    #[test]
    fn test_all_extractions_failed_is_unknown() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![None], 1);
        h.lp.step(frame(0));
        assert_eq!(current_verdict(&h.board), Some(Verdict::Unknown));
        assert_eq!(h.match_calls.get(), 0);
    }

    #[test]
    fn test_short_extractor_output_is_tolerated() {
        // Extractor returns fewer results than regions.
        let mut h = harness(alice_gallery(), vec![region(0), region(50)], vec![Some(sig(&[2.0, 0.0]))], 1);
        h.lp.step(frame(0));
        assert_eq!(current_verdict(&h.board), Some(Verdict::Unknown));
        let overlays = &h.frames.latest().unwrap().overlays;
        assert_eq!(overlays.len(), 2);
        assert_eq!(overlays[1].class, RegionClass::Pending);
    }

    #[test]
    fn test_only_every_nth_frame_is_evaluated() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![Some(sig(&[0.0, 0.0]))], 10);
        for seq in 0..25 {
            h.lp.step(frame(seq));
        }
        assert_eq!(h.detect_calls.get(), 3); // frames 0, 10, 20
        assert_eq!(h.board.read().generation, 3);
        assert_eq!(h.lp.stats().frames_captured, 25);
        assert_eq!(h.lp.stats().frames_evaluated, 3);

        let latest = h.frames.latest().unwrap();
        assert_eq!(latest.sequence, 24);
        assert!(latest.decision.is_none(), "frame 24 is pass-through");
    }

    #[test]
    fn test_annotated_frame_carries_same_decision() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![Some(sig(&[0.2, 0.0]))], 1);
        h.lp.step(frame(0));
        let latest = h.frames.latest().unwrap();
        let board_decision = h.board.read().state.decision().cloned();
        assert_eq!(latest.decision, board_decision);
    }

    #[test]
    fn test_same_signature_same_decision() {
        let mut h = harness(alice_gallery(), vec![region(0)], vec![Some(sig(&[0.4, 0.1]))], 1);
        h.lp.step(frame(0));
        let first = current_verdict(&h.board);
        h.lp.step(frame(1));
        assert_eq!(current_verdict(&h.board), first);
    }

    #[test]
    fn test_detector_failure_keeps_previous_decision() {
        let mut h = harness(alice_gallery(), vec![], vec![], 1);
        h.lp.step(frame(0));
        let before = h.board.read();

        h.lp.detector.fail = true;
        h.lp.step(frame(1));

        assert_eq!(h.board.read(), before);
        assert_eq!(h.lp.stats().detector_failures, 1);
        assert_eq!(h.frames.latest().unwrap().sequence, 1);
    }

    #[test]
    fn test_capture_failure_is_fatal_and_closes_board() {
        let mut h = harness(alice_gallery(), vec![], vec![], 1);
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![
                Ok(frame(0)),
                Ok(frame(1)),
                Err(CaptureError::DeviceUnavailable("unplugged".into())),
                Ok(frame(3)),
            ]),
        };
        let stop = AtomicBool::new(false);
        let err = h.lp.run(&mut source, &stop).unwrap_err();
        assert!(matches!(err, LoopError::Capture(CaptureError::DeviceUnavailable(_))));
        assert_eq!(h.lp.stats().frames_captured, 2);
        assert_eq!(source.frames.len(), 1, "no retry after failure");

        match h.board.read().state {
            BoardState::Stopped { last: Some(d) } => assert_eq!(d.verdict, Verdict::NoFace),
            other => panic!("expected stopped board, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_flag_ends_loop_cleanly() {
        let mut h = harness(alice_gallery(), vec![], vec![], 1);
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![Ok(frame(0))]),
        };
        let stop = AtomicBool::new(true);
        let stats = h.lp.run(&mut source, &stop).unwrap();
        assert_eq!(stats.frames_captured, 0);
        assert!(h.board.read().state.is_stopped());
    }
}
