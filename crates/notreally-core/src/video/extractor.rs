//! Video branch: decode frames, detect landmarks, run the blink/jitter analyzer.

use std::path::Path;
use std::sync::Arc;

use super::frames::{FrameReader, FrameSource};
use super::{AnalyzerParams, BlinkJitterAnalyzer, VideoFeatureSummary};
use crate::capability::Extractor;
use crate::landmarks::{LandmarkSource, LandmarkSourceFactory};
use crate::probe::{ContainerMetadata, ContainerProbe};

/// Frame rate assumed when the container does not report a usable one.
pub const FALLBACK_FPS: f64 = 30.0;

pub struct VideoExtractor {
    probe: ContainerProbe,
    ffmpeg: String,
    landmarks: Arc<dyn LandmarkSourceFactory>,
    params: AnalyzerParams,
}

impl VideoExtractor {
    pub fn new(landmarks: Arc<dyn LandmarkSourceFactory>, params: AnalyzerParams) -> Self {
        Self {
            probe: ContainerProbe::default(),
            ffmpeg: "ffmpeg".to_string(),
            landmarks,
            params,
        }
    }

    /// Override the `ffmpeg`/`ffprobe` executables.
    pub fn with_tools(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.probe = ContainerProbe::new(ffprobe);
        self
    }

    pub fn params(&self) -> AnalyzerParams {
        self.params
    }

    /// Analyze the video stream of `path`.
    ///
    /// `None` when the stream cannot be probed or decoded, or no landmark
    /// detector can be opened. A decodable video without faces yields a zeroed
    /// summary instead.
    pub fn analyze(&self, path: &Path) -> Option<VideoFeatureSummary> {
        let meta = self.probe.probe(path)?;
        self.analyze_probed(path, &meta)
    }

    /// [`VideoExtractor::analyze`] with container metadata already in hand.
    pub fn analyze_probed(
        &self,
        path: &Path,
        meta: &ContainerMetadata,
    ) -> Option<VideoFeatureSummary> {
        let Some((width, height)) = meta.display_dimensions() else {
            tracing::debug!(path = %path.display(), "no video stream");
            return None;
        };
        let fps = meta
            .video_avg_fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(FALLBACK_FPS);

        let mut source = match self.landmarks.open() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "landmark detector unavailable");
                return None;
            }
        };

        let mut frames = match FrameReader::open(&self.ffmpeg, path, width, height) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "frame decoder unavailable");
                return None;
            }
        };

        let (decode_w, decode_h) = frames.dimensions();
        tracing::debug!(
            width,
            height,
            decode_w,
            decode_h,
            rotation = meta.video_rotation.unwrap_or(0),
            fps,
            stride = self.params.stride(),
            "analyzing video"
        );
        Some(analyze_frames(fps, self.params, &mut frames, source.as_mut()))
    }
}

impl Extractor<VideoFeatureSummary> for VideoExtractor {
    fn name(&self) -> &'static str {
        "video"
    }

    fn try_extract(&self, media: &Path) -> Option<VideoFeatureSummary> {
        self.analyze(media)
    }

    fn try_extract_probed(
        &self,
        media: &Path,
        metadata: &ContainerMetadata,
    ) -> Option<VideoFeatureSummary> {
        self.analyze_probed(media, metadata)
    }
}

/// Drive the analyzer over decoded frames, offering every `stride`-th frame
/// to the landmark source.
///
/// A decode error ends the stream; a detection error counts as "no face".
pub fn analyze_frames(
    fps: f64,
    params: AnalyzerParams,
    frames: &mut dyn FrameSource,
    source: &mut dyn LandmarkSource,
) -> VideoFeatureSummary {
    let stride = params.stride() as u64;
    let mut analyzer = BlinkJitterAnalyzer::new(fps, params);

    while let Some(item) = frames.next_frame() {
        let (index, frame) = match item {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "frame stream ended early");
                break;
            }
        };
        if index % stride != 0 {
            continue;
        }
        let landmarks = match source.detect(frame) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(frame = index, error = %e, "landmark detection failed");
                None
            }
        };
        analyzer.observe(index, landmarks.as_ref());
    }

    let summary = analyzer.finish();
    tracing::debug!(
        frames_analyzed = summary.frames_analyzed,
        blinks = summary.blinks,
        "video analysis finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{LandmarkError, LandmarkSet, Point};
    use crate::video::frames::FrameError;
    use crate::video::tests::face_with_ear;
    use image::RgbImage;

    /// Reads EAR from the red channel of pixel (0, 0); red 0 means no face,
    /// red 255 means a detector failure.
    struct PixelCoded {
        calls: usize,
    }

    impl LandmarkSource for PixelCoded {
        fn detect(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>, LandmarkError> {
            self.calls += 1;
            match frame.get_pixel(0, 0)[0] {
                0 => Ok(None),
                255 => Err(LandmarkError::Inference("boom".into())),
                red => Ok(Some(face_with_ear(red as f64 / 100.0, Point::new(1.0, 1.0)))),
            }
        }
    }

    fn frame(red: u8) -> RgbImage {
        RgbImage::from_pixel(2, 2, image::Rgb([red, 0, 0]))
    }

    /// Frames held in memory; `None` entries are decode errors.
    struct Frames {
        items: std::vec::IntoIter<Option<RgbImage>>,
        current: RgbImage,
        index: u64,
    }

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Option<Result<(u64, &RgbImage), FrameError>> {
            let item = self.items.next()?;
            let index = self.index;
            self.index += 1;
            match item {
                Some(image) => {
                    self.current = image;
                    Some(Ok((index, &self.current)))
                }
                None => Some(Err(FrameError::Read(std::io::Error::other("pipe closed")))),
            }
        }
    }

    fn frames_with(items: Vec<Option<RgbImage>>) -> Frames {
        Frames {
            items: items.into_iter(),
            current: RgbImage::new(1, 1),
            index: 0,
        }
    }

    fn frames(reds: &[u8]) -> Frames {
        frames_with(reds.iter().map(|&r| Some(frame(r))).collect())
    }

    #[test]
    fn test_only_strided_frames_are_detected() {
        let mut source = PixelCoded { calls: 0 };
        let summary =
            analyze_frames(30.0, AnalyzerParams::default(), &mut frames(&[30; 23]), &mut source);
        // frames 0, 5, 10, 15, 20
        assert_eq!(source.calls, 5);
        assert_eq!(summary.frames_analyzed, 5);
    }

    #[test]
    fn test_no_face_and_errors_are_skipped() {
        let mut source = PixelCoded { calls: 0 };
        let params = AnalyzerParams {
            frame_stride: 1,
            ..Default::default()
        };
        let summary = analyze_frames(30.0, params, &mut frames(&[30, 0, 255, 30, 0]), &mut source);
        assert_eq!(source.calls, 5);
        assert_eq!(summary.frames_analyzed, 2);
    }

    #[test]
    fn test_faceless_video_is_zeroed_not_absent() {
        let mut source = PixelCoded { calls: 0 };
        let summary =
            analyze_frames(30.0, AnalyzerParams::default(), &mut frames(&[0; 50]), &mut source);
        assert_eq!(summary, VideoFeatureSummary::default());
    }

    #[test]
    fn test_decode_error_stops_stream() {
        let mut source = PixelCoded { calls: 0 };
        let params = AnalyzerParams {
            frame_stride: 1,
            ..Default::default()
        };
        let mut input = frames_with(vec![Some(frame(30)), Some(frame(30)), None, Some(frame(30))]);
        let summary = analyze_frames(30.0, params, &mut input, &mut source);
        assert_eq!(summary.frames_analyzed, 2);
    }

    struct NoDetector;

    impl LandmarkSourceFactory for NoDetector {
        fn open(&self) -> Result<Box<dyn LandmarkSource>, LandmarkError> {
            Err(LandmarkError::ModelNotFound("face_mesh.onnx".into()))
        }
    }

    #[test]
    fn test_missing_file_is_absent() {
        let extractor = VideoExtractor::new(Arc::new(NoDetector), AnalyzerParams::default())
            .with_tools("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(extractor.analyze(Path::new("/nonexistent/clip.mp4")).is_none());
    }

    #[test]
    fn test_metadata_without_video_is_absent() {
        let extractor = VideoExtractor::new(Arc::new(NoDetector), AnalyzerParams::default())
            .with_tools("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let meta = ContainerMetadata {
            has_audio: true,
            audio_sample_rate: Some(44_100),
            ..Default::default()
        };
        assert!(extractor
            .analyze_probed(Path::new("/nonexistent/clip.mp4"), &meta)
            .is_none());
    }

    #[test]
    fn test_decodes_frames_from_a_byte_stream() {
        // 2x2 frames whose red channel encodes EAR 0.30, read the way the
        // ffmpeg pipe is read.
        let mut bytes = Vec::new();
        for _ in 0..10 {
            bytes.extend([30u8, 0, 0].repeat(4));
        }
        let mut reader = FrameReader::from_reader(std::io::Cursor::new(bytes), 2, 2).unwrap();
        let mut source = PixelCoded { calls: 0 };
        let summary = analyze_frames(30.0, AnalyzerParams::default(), &mut reader, &mut source);
        // frames 0 and 5
        assert_eq!(summary.frames_analyzed, 2);
    }
}
