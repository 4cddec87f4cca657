use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DemuxConfig;
use crate::engine::{EngineCommand, EngineCommandBuilder, EngineHandle, EngineLoader, JobScratch};
use crate::error::{with_timeout, Result, XsyncError};
use crate::timeline::TimelineValidator;
use crate::track::{format_extracted_name, normalize_tracks, Track, TrackSource, EXTRACTED_PREFIX, REPAIR_VARIANT};
use crate::vtt::vtt_to_srt;
use super::{ExtractionJob, JobStatus, Rung};

const INPUT_NAME: &str = "input.bin";
const CONTAINER_NAME: &str = "embedded_subs.mkv";
const REMOTE_STEM: &str = "remote_sub";
const STREAM_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Runs extraction attempts against the shared engine until the output looks sane
pub struct DemuxOrchestrator {
    loader: Arc<EngineLoader>,
    validator: TimelineValidator,
    commands: EngineCommandBuilder,
    config: DemuxConfig,
}

impl DemuxOrchestrator {
    pub fn new(loader: Arc<EngineLoader>, validator: TimelineValidator, config: DemuxConfig) -> Self {
        let commands = EngineCommandBuilder::new(&config.analyze_duration, &config.probe_size);
        Self {
            loader,
            validator,
            commands,
            config,
        }
    }

    /// Extract every subtitle track from `input` within the job budget
    pub async fn extract(&self, job_id: &str, input: Vec<u8>) -> Result<Vec<Track>> {
        let mut job = ExtractionJob::new(job_id, input);
        self.run(&mut job).await?;
        Ok(job.produced_tracks)
    }

    /// Drive `job` through the ladder, recording each rung it reaches
    pub async fn run(&self, job: &mut ExtractionJob) -> Result<()> {
        if job.input.is_empty() {
            job.status = JobStatus::Failed;
            return Err(XsyncError::Extraction("Input buffer is empty".to_string()));
        }

        let outcome = match self.loader.acquire().await {
            Ok(handle) => with_timeout("extract job", self.config.job_timeout(), self.ladder(&handle, job)).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(tracks) => {
                info!(
                    "Job {} produced {} track(s) via {:?} in {}ms",
                    job.job_id,
                    tracks.len(),
                    job.strategies_attempted,
                    job.elapsed().num_milliseconds()
                );
                job.produced_tracks = tracks;
                job.status = JobStatus::Succeeded;
                Ok(())
            }
            Err(e) => {
                warn!("Job {} failed after {:?}: {}", job.job_id, job.strategies_attempted, e);
                job.status = JobStatus::Failed;
                Err(e)
            }
        }
    }

    /// Extract the subtitle streams of a remote stream URL.
    ///
    /// The engine reads the URL itself, so nothing is uploaded. Streams come back as
    /// WebVTT and are converted to SRT; there is no repair ladder for remote input.
    pub async fn extract_url(&self, job_id: &str, stream_url: &str) -> Result<Vec<Track>> {
        let stream_url = stream_url.trim();
        if stream_url.is_empty() {
            return Err(XsyncError::Extraction("Missing stream URL".to_string()));
        }
        if !STREAM_SCHEMES.iter().any(|scheme| stream_url.starts_with(scheme)) {
            return Err(XsyncError::Extraction(format!(
                "Unsupported stream URL '{}'",
                shorten(stream_url)
            )));
        }

        info!("Job {}: extracting subtitles from {}", job_id, shorten(stream_url));
        let handle = self.loader.acquire().await?;
        let tracks = with_timeout(
            "stream extract job",
            self.config.url_timeout(),
            self.remote_tracks(&handle, job_id, stream_url),
        )
        .await?;
        Ok(normalize_tracks(tracks))
    }

    async fn remote_tracks(&self, handle: &EngineHandle, job_id: &str, stream_url: &str) -> Result<Vec<Track>> {
        let scratch = JobScratch::new(handle.engine(), job_id);
        let pattern = scratch.name(&format!("{}_%02d.vtt", REMOTE_STEM));
        let command = self.commands.extract_all_vtt(stream_url, &pattern);
        // a failed run may still have written some streams
        let failure = match handle.run_in(&scratch, command, self.config.url_timeout()).await {
            Ok(()) => None,
            Err(e) if recoverable(&e) => {
                warn!("Job {}: stream extraction failed: {}", job_id, e);
                Some(e)
            }
            Err(e) => return Err(e),
        };

        let stem = format!("{}_", REMOTE_STEM);
        let mut by_index = BTreeMap::new();
        for local in scratch.list() {
            let Some(index) = local
                .strip_prefix(stem.as_str())
                .and_then(|rest| rest.strip_suffix(".vtt"))
                .and_then(|digits| digits.parse::<usize>().ok())
            else {
                continue;
            };
            let Some(bytes) = scratch.read_nonempty(&scratch.name(&local)) else { continue };
            match vtt_to_srt(&String::from_utf8_lossy(&bytes)) {
                Some(srt) => {
                    by_index.insert(index, Track::text(index.to_string(), local, srt, TrackSource::Remote));
                }
                None => warn!("Job {}: stream {} has no cues", job_id, index),
            }
        }

        let tracks: Vec<Track> = by_index.into_values().collect();
        if tracks.is_empty() {
            return Err(XsyncError::Extraction(match failure {
                Some(e) => format!("No subtitle tracks found in stream: {}", e),
                None => "No subtitle tracks found in stream".to_string(),
            }));
        }
        let assessment = self.validator.assess(&tracks);
        if !assessment.is_plausible() {
            warn!(
                "Job {}: stream timeline looks implausible (flat={}, non_monotonic={})",
                job_id, assessment.flat_cue_starts, assessment.non_monotonic_cues
            );
        }
        info!("Job {}: {} track(s) from stream", job_id, tracks.len());
        Ok(tracks)
    }

    async fn ladder(&self, handle: &EngineHandle, job: &mut ExtractionJob) -> Result<Vec<Track>> {
        let scratch = JobScratch::new(handle.engine(), &job.job_id);
        let input = scratch.write(INPUT_NAME, &job.input)?;

        job.strategies_attempted.push(Rung::Primary);
        let primary = self
            .commands
            .extract_all_srt(&input, &scratch.name(&format!("{}_%02d.srt", EXTRACTED_PREFIX)));
        let primary_failed = match self.attempt(handle, &scratch, primary).await {
            Ok(()) => false,
            Err(e) if recoverable(&e) => {
                warn!("Job {}: primary extraction failed: {}", job.job_id, e);
                true
            }
            Err(e) => return Err(e),
        };
        // a failed run may still have written some streams
        let mut by_index = self.collect_text(&scratch, None, TrackSource::Primary);

        if primary_failed || by_index.is_empty() {
            job.strategies_attempted.push(Rung::StreamCopy);
            self.stream_copy(handle, &scratch, &input, &mut by_index).await?;
        }

        let best: Vec<Track> = by_index.into_values().collect();
        if best.is_empty() {
            return Err(XsyncError::Extraction("No subtitle tracks found".to_string()));
        }

        let assessment = self.validator.assess(&best);
        job.assessment = Some(assessment);
        if assessment.is_plausible() {
            return Ok(normalize_tracks(best));
        }
        warn!(
            "Job {}: implausible timeline (flat={}, non_monotonic={}), retrying with timestamp repair",
            job.job_id, assessment.flat_cue_starts, assessment.non_monotonic_cues
        );

        job.strategies_attempted.push(Rung::RepairNormalized);
        discard_text_outputs(&scratch);
        let normalized = self.commands.normalized_extract(
            &input,
            &scratch.name(&format!("{}_{}_%02d.srt", EXTRACTED_PREFIX, REPAIR_VARIANT)),
        );
        // from here on `best` is returned whatever the repair passes do
        match self.attempt(handle, &scratch, normalized).await {
            Ok(()) => {
                if let Some(repaired) = self.adopt_if_plausible(job, &scratch) {
                    return Ok(repaired);
                }
            }
            Err(e) => warn!("Job {}: normalized extraction failed: {}", job.job_id, e),
        }

        job.strategies_attempted.push(Rung::RepairIsolated);
        discard_text_outputs(&scratch);
        match self.isolate_and_convert(handle, &scratch, &input).await {
            Ok(()) => {
                if let Some(repaired) = self.adopt_if_plausible(job, &scratch) {
                    return Ok(repaired);
                }
            }
            Err(e) => warn!("Job {}: isolated repair failed: {}", job.job_id, e),
        }

        warn!("Job {}: repair passes did not help, keeping original tracks", job.job_id);
        Ok(normalize_tracks(best))
    }

    /// Rung 2: one Matroska container holding every subtitle stream, split and converted
    async fn stream_copy(
        &self,
        handle: &EngineHandle,
        scratch: &JobScratch,
        input: &str,
        by_index: &mut BTreeMap<usize, Track>,
    ) -> Result<()> {
        let container = scratch.name(CONTAINER_NAME);
        match self.attempt(handle, scratch, self.commands.copy_all_subtitles(input, &container)).await {
            Ok(()) => {}
            Err(e) if recoverable(&e) => {
                warn!("Stream copy failed: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        if scratch.read_nonempty(&container).is_none() {
            debug!("Stream copy produced an empty container");
            return Ok(());
        }

        for stream in 0..self.config.max_streams {
            let index = stream + 1;
            let split = scratch.name(&format!("copy_sub_{:02}.mkv", index));
            if let Err(e) = self.attempt(handle, scratch, self.commands.split_stream(&container, stream, &split)).await {
                debug!("No subtitle stream {}: {}", stream, e);
                break;
            }
            let Some(copy) = scratch.read_nonempty(&split) else { break };
            if by_index.contains_key(&index) {
                scratch.remove(&split);
                continue;
            }

            let label = format_extracted_name(index, "srt", None);
            let srt = scratch.name(&label);
            let converted = match self.attempt(handle, scratch, self.commands.convert_to_srt(&split, &srt)).await {
                Ok(()) => scratch.read_nonempty(&srt),
                Err(e) => {
                    debug!("Stream {} copy not convertible to text: {}", stream, e);
                    None
                }
            };
            match converted {
                Some(bytes) => {
                    let track = Track::text(index.to_string(), label, String::from_utf8_lossy(&bytes).into_owned(), TrackSource::Copy);
                    by_index.insert(index, track);
                }
                None if self.config.include_binary_copies => {
                    let label = format_extracted_name(index, "mkv", None);
                    by_index.insert(index, Track::binary(index.to_string(), label, copy));
                }
                None => {}
            }
            scratch.remove(&split);
        }
        scratch.remove(&container);
        Ok(())
    }

    /// Repair pass 2: isolate each stream with zero-based timestamps, then convert it
    async fn isolate_and_convert(&self, handle: &EngineHandle, scratch: &JobScratch, input: &str) -> Result<()> {
        for stream in 0..self.config.max_streams {
            let index = stream + 1;
            let remux = scratch.name(&format!("remux_sub_{:02}.mkv", index));
            match self.attempt(handle, scratch, self.commands.isolate_stream(input, stream, &remux)).await {
                Ok(()) => {}
                Err(e) if recoverable(&e) => {
                    debug!("No subtitle stream {} to isolate: {}", stream, e);
                    break;
                }
                Err(e) => return Err(e),
            }
            if scratch.read_nonempty(&remux).is_none() {
                break;
            }
            let srt = scratch.name(&format_extracted_name(index, "srt", Some(REPAIR_VARIANT)));
            if let Err(e) = self.attempt(handle, scratch, self.commands.normalized_convert(&remux, &srt)).await {
                if !recoverable(&e) {
                    return Err(e);
                }
                debug!("Isolated stream {} not convertible: {}", stream, e);
            }
            scratch.remove(&remux);
        }
        Ok(())
    }

    fn adopt_if_plausible(&self, job: &mut ExtractionJob, scratch: &JobScratch) -> Option<Vec<Track>> {
        let repaired: Vec<Track> = self
            .collect_text(scratch, Some(REPAIR_VARIANT), TrackSource::Repaired)
            .into_values()
            .collect();
        if repaired.is_empty() {
            debug!("Job {}: repair pass produced no tracks", job.job_id);
            return None;
        }
        let assessment = self.validator.assess(&repaired);
        if !assessment.is_plausible() {
            debug!("Job {}: repaired tracks still implausible", job.job_id);
            return None;
        }
        info!("Job {}: adopted {} repaired track(s)", job.job_id, repaired.len());
        job.assessment = Some(assessment);
        Some(normalize_tracks(repaired))
    }

    /// Non-empty `extracted_sub_[variant_]NN.srt` outputs keyed by stream index
    fn collect_text(&self, scratch: &JobScratch, variant: Option<&str>, source: TrackSource) -> BTreeMap<usize, Track> {
        let stem = match variant {
            Some(variant) => format!("{}_{}_", EXTRACTED_PREFIX, variant),
            None => format!("{}_", EXTRACTED_PREFIX),
        };
        let mut tracks = BTreeMap::new();
        for local in scratch.list() {
            let Some(index) = local
                .strip_prefix(stem.as_str())
                .and_then(|rest| rest.strip_suffix(".srt"))
                .and_then(|digits| digits.parse::<usize>().ok())
            else {
                continue;
            };
            let Some(bytes) = scratch.read_nonempty(&scratch.name(&local)) else { continue };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            tracks.insert(index, Track::text(index.to_string(), local, text, source));
        }
        tracks
    }

    async fn attempt(&self, handle: &EngineHandle, scratch: &JobScratch, command: EngineCommand) -> Result<()> {
        handle.run_in(scratch, command, self.config.attempt_timeout()).await
    }
}

/// Errors that only mean "try the next rung"
fn recoverable(e: &XsyncError) -> bool {
    matches!(e, XsyncError::Engine(_)) || e.is_timeout()
}

/// URL for log lines, cut before any query string
fn shorten(url: &str) -> &str {
    let mut end = url.find('?').unwrap_or(url.len()).min(100);
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    &url[..end]
}

fn discard_text_outputs(scratch: &JobScratch) {
    for local in scratch.list() {
        if local.ends_with(".srt") {
            scratch.remove(&scratch.name(&local));
        }
    }
}
