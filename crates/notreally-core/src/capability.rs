//! Optional extraction capabilities.
//!
//! Each branch of the pipeline (video, audio, container metadata) depends on
//! an external tool that may be missing or may fail for a given input. A
//! capability either produces its summary or reports `None`; absence flows
//! through the feature vector as zeros instead of as an error.

use std::path::Path;
use std::sync::Arc;

use crate::audio::{AudioFeatureSummary, AudioSummarizer};
use crate::landmarks::LandmarkSourceFactory;
use crate::probe::{ContainerMetadata, ContainerProbe};
use crate::vector::ExtractedFeatures;
use crate::video::extractor::VideoExtractor;
use crate::video::{AnalyzerParams, VideoFeatureSummary};

/// A single "try-extract" capability.
pub trait Extractor<T>: Send + Sync {
    /// Short branch name used in logs.
    fn name(&self) -> &'static str;

    /// Extract a summary from the media file, or `None` if unavailable.
    fn try_extract(&self, media: &Path) -> Option<T>;

    /// Like [`Extractor::try_extract`], given the container metadata already
    /// probed from the same file.
    fn try_extract_probed(&self, media: &Path, _metadata: &ContainerMetadata) -> Option<T> {
        self.try_extract(media)
    }
}

/// External executables the extractors shell out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// The set of capabilities available to a pipeline.
///
/// A `None` slot is a capability that is not installed; its summary is
/// always absent.
#[derive(Clone, Default)]
pub struct Extractors {
    pub video: Option<Arc<dyn Extractor<VideoFeatureSummary>>>,
    pub audio: Option<Arc<dyn Extractor<AudioFeatureSummary>>>,
    pub metadata: Option<Arc<dyn Extractor<ContainerMetadata>>>,
}

impl Extractors {
    /// No capabilities at all; every summary is absent.
    pub fn none() -> Self {
        Self::default()
    }

    /// The standard branches. Without a landmark detector the video branch
    /// is not installed.
    pub fn standard(
        tools: &Tools,
        params: AnalyzerParams,
        landmarks: Option<Arc<dyn LandmarkSourceFactory>>,
    ) -> Self {
        let video = landmarks.map(|factory| {
            Arc::new(VideoExtractor::new(factory, params).with_tools(&tools.ffmpeg, &tools.ffprobe))
                as Arc<dyn Extractor<VideoFeatureSummary>>
        });
        Self {
            video,
            audio: Some(Arc::new(AudioSummarizer::new(&tools.ffmpeg))),
            metadata: Some(Arc::new(ContainerProbe::new(&tools.ffprobe))),
        }
    }

    /// Run all branches and join them.
    ///
    /// Container metadata is probed first and handed to the video branch;
    /// audio decoding starts right away. Results are assembled by slot, never
    /// by completion order.
    pub fn extract(&self, media: &Path) -> ExtractedFeatures {
        std::thread::scope(|scope| {
            let audio = self
                .audio
                .as_deref()
                .map(|x| scope.spawn(move || run_branch(x, media, None)));
            let metadata = self
                .metadata
                .as_deref()
                .map(|x| scope.spawn(move || run_branch(x, media, None)))
                .and_then(|h| join_branch("metadata", h));

            let probed = metadata.as_ref();
            let video = std::thread::scope(|inner| {
                self.video
                    .as_deref()
                    .map(|x| inner.spawn(move || run_branch(x, media, probed)))
                    .and_then(|h| join_branch("video", h))
            });

            ExtractedFeatures {
                video,
                audio: audio.and_then(|h| join_branch("audio", h)),
                metadata,
            }
        })
    }
}

fn run_branch<T>(
    extractor: &dyn Extractor<T>,
    media: &Path,
    metadata: Option<&ContainerMetadata>,
) -> Option<T> {
    let started = std::time::Instant::now();
    let out = match metadata {
        Some(meta) => extractor.try_extract_probed(media, meta),
        None => extractor.try_extract(media),
    };
    tracing::debug!(
        branch = extractor.name(),
        available = out.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extraction branch finished"
    );
    out
}

fn join_branch<T>(name: &str, handle: std::thread::ScopedJoinHandle<'_, Option<T>>) -> Option<T> {
    match handle.join() {
        Ok(out) => out,
        Err(_) => {
            tracing::error!(branch = name, "extraction branch panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixed<T: Clone + Send + Sync>(Option<T>, Duration);

    impl<T: Clone + Send + Sync> Extractor<T> for Fixed<T> {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn try_extract(&self, _media: &Path) -> Option<T> {
            std::thread::sleep(self.1);
            self.0.clone()
        }
    }

    struct Panics;

    impl Extractor<AudioFeatureSummary> for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn try_extract(&self, _media: &Path) -> Option<AudioFeatureSummary> {
            panic!("decoder crashed");
        }
    }

    #[test]
    fn test_no_capabilities_yield_no_summaries() {
        let features = Extractors::none().extract(Path::new("clip.mp4"));
        assert!(features.video.is_none());
        assert!(features.audio.is_none());
        assert!(features.metadata.is_none());
    }

    #[test]
    fn test_slots_assembled_regardless_of_completion_order() {
        let video = VideoFeatureSummary {
            avg_blink_rate_per_minute: 12.0,
            facial_jitter_std_dev: 0.1,
            frames_analyzed: 10,
            blinks: 2,
        };
        let meta = ContainerMetadata {
            duration_seconds: Some(3.0),
            ..Default::default()
        };
        let extractors = Extractors {
            // Slowest branch first.
            video: Some(Arc::new(Fixed(Some(video), Duration::from_millis(30)))),
            audio: None,
            metadata: Some(Arc::new(Fixed(Some(meta.clone()), Duration::ZERO))),
        };
        let features = extractors.extract(Path::new("clip.mp4"));
        assert_eq!(features.video, Some(video));
        assert_eq!(features.metadata, Some(meta));
        assert!(features.audio.is_none());
    }

    #[test]
    fn test_standard_without_detector_has_no_video_branch() {
        let extractors = Extractors::standard(&Tools::default(), AnalyzerParams::default(), None);
        assert!(extractors.video.is_none());
        assert!(extractors.audio.is_some());
        assert!(extractors.metadata.is_some());
    }

    /// Video branch that only works from already-probed metadata.
    #[derive(Default)]
    struct NeedsMetadata {
        seen: std::sync::Mutex<Option<ContainerMetadata>>,
    }

    impl Extractor<VideoFeatureSummary> for NeedsMetadata {
        fn name(&self) -> &'static str {
            "needs-metadata"
        }

        fn try_extract(&self, _media: &Path) -> Option<VideoFeatureSummary> {
            panic!("probed the container a second time");
        }

        fn try_extract_probed(
            &self,
            _media: &Path,
            metadata: &ContainerMetadata,
        ) -> Option<VideoFeatureSummary> {
            *self.seen.lock().unwrap() = Some(metadata.clone());
            Some(VideoFeatureSummary {
                frames_analyzed: 1,
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_video_branch_reuses_container_metadata() {
        let meta = ContainerMetadata {
            video_width: Some(1920),
            video_height: Some(1080),
            video_rotation: Some(90),
            has_video: true,
            ..Default::default()
        };
        let video = Arc::new(NeedsMetadata::default());
        let extractors = Extractors {
            video: Some(video.clone() as Arc<dyn Extractor<VideoFeatureSummary>>),
            audio: None,
            metadata: Some(Arc::new(Fixed(Some(meta.clone()), Duration::from_millis(20)))),
        };
        let features = extractors.extract(Path::new("clip.mp4"));
        assert_eq!(features.video.map(|v| v.frames_analyzed), Some(1));
        assert_eq!(video.seen.lock().unwrap().as_ref(), Some(&meta));
        assert_eq!(features.metadata, Some(meta));
    }

    #[test]
    fn test_video_branch_runs_alone_without_metadata() {
        let extractors = Extractors {
            video: Some(Arc::new(Fixed(
                Some(VideoFeatureSummary::default()),
                Duration::ZERO,
            ))),
            ..Extractors::none()
        };
        let features = extractors.extract(Path::new("clip.mp4"));
        assert_eq!(features.video, Some(VideoFeatureSummary::default()));
    }

    #[test]
    fn test_panicking_branch_is_absent() {
        let extractors = Extractors {
            audio: Some(Arc::new(Panics)),
            ..Extractors::none()
        };
        let features = extractors.extract(Path::new("clip.mp4"));
        assert!(features.audio.is_none());
    }
}
