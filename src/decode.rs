use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DemuxConfig;
use crate::engine::{EngineCommandBuilder, EngineHandle, EngineLoader, JobScratch};
use crate::error::{with_timeout, Result, XsyncError};

/// Size of a canonical PCM WAV header; anything shorter holds no audio
pub const WAV_HEADER_BYTES: usize = 44;

const SHARED_INPUT_NAME: &str = "shared_input.bin";

/// One slice of media to decode
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    pub input: Vec<u8>,
    /// Timeline position the window is reported at
    pub start_sec: Option<f64>,
    /// Decode at most this many seconds
    pub dur_sec: Option<f64>,
    /// Input seek applied before decoding
    pub seek_to_sec: Option<f64>,
}

impl AudioWindow {
    pub fn start_ms(&self) -> u64 {
        let start = self.start_sec.or(self.seek_to_sec).unwrap_or(0.0);
        if start.is_finite() && start > 0.0 {
            (start * 1000.0).round() as u64
        } else {
            0
        }
    }
}

/// 16 kHz mono PCM WAV for one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedWindow {
    #[serde(with = "crate::transfer::b64")]
    pub audio: Vec<u8>,
    pub start_ms: u64,
}

/// Decodes audio windows on the shared engine
pub struct AudioDecoder {
    loader: Arc<EngineLoader>,
    commands: EngineCommandBuilder,
    config: DemuxConfig,
}

impl AudioDecoder {
    pub fn new(loader: Arc<EngineLoader>, config: DemuxConfig) -> Self {
        let commands = EngineCommandBuilder::new(&config.analyze_duration, &config.probe_size);
        Self {
            loader,
            commands,
            config,
        }
    }

    /// Decode every window in order. Any unusable window fails the whole job.
    pub async fn decode_windows(&self, job_id: &str, windows: Vec<AudioWindow>) -> Result<Vec<DecodedWindow>> {
        if windows.is_empty() {
            return Err(XsyncError::Decode("No audio windows provided".to_string()));
        }
        if let Some(idx) = windows.iter().position(|w| w.input.is_empty()) {
            return Err(XsyncError::Decode(format!("Missing buffer for window {}", idx + 1)));
        }

        let handle = self.loader.acquire().await?;
        with_timeout(
            "audio decode job",
            self.config.decode_timeout(),
            self.decode_on(&handle, job_id, &windows),
        )
        .await
    }

    async fn decode_on(&self, handle: &EngineHandle, job_id: &str, windows: &[AudioWindow]) -> Result<Vec<DecodedWindow>> {
        let scratch = JobScratch::new(handle.engine(), job_id);
        let shared = windows.len() > 1 && windows.iter().all(|w| w.input == windows[0].input);
        let shared_input = if shared {
            debug!("Job {}: {} windows share one input", job_id, windows.len());
            Some(scratch.write(SHARED_INPUT_NAME, &windows[0].input)?)
        } else {
            None
        };

        let mut decoded = Vec::with_capacity(windows.len());
        for (i, window) in windows.iter().enumerate() {
            let input = match &shared_input {
                Some(name) => name.clone(),
                None => scratch.write(&format!("win_{}.bin", i), &window.input)?,
            };
            let output = scratch.name(&format!("win_{}.wav", i));
            let command = self
                .commands
                .decode_window(&input, &output, window.seek_to_sec, window.dur_sec);

            let result = handle.run_in(&scratch, command, self.config.attempt_timeout()).await;
            let audio = result.and_then(|()| scratch.read(&output)).map_err(|e| match e {
                XsyncError::Engine(msg) => XsyncError::Decode(format!("window {}: {}", i + 1, msg)),
                other => other,
            });
            scratch.remove(&output);
            if shared_input.is_none() {
                scratch.remove(&input);
            }

            let audio = audio?;
            if audio.is_empty() {
                return Err(XsyncError::Decode(format!("Engine produced empty audio for window {}", i + 1)));
            }
            if audio.len() < WAV_HEADER_BYTES {
                return Err(XsyncError::Decode(format!(
                    "Engine produced too-small audio for window {} ({} bytes)",
                    i + 1,
                    audio.len()
                )));
            }
            decoded.push(DecodedWindow {
                audio,
                start_ms: window.start_ms(),
            });
        }

        info!("Job {}: decoded {} audio window(s)", job_id, decoded.len());
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::memory::{arg_after, MemoryEngine};
    use crate::engine::{Engine, HostCapabilities, MockEngineBootstrap};

    fn window(input: &[u8], start_sec: Option<f64>, seek_to_sec: Option<f64>) -> AudioWindow {
        AudioWindow {
            input: input.to_vec(),
            start_sec,
            dur_sec: Some(30.0),
            seek_to_sec,
        }
    }

    fn decoder(memory: Arc<MemoryEngine>) -> AudioDecoder {
        decoder_with(memory, DemuxConfig::default())
    }

    fn decoder_with(memory: Arc<MemoryEngine>, config: DemuxConfig) -> AudioDecoder {
        let engine: Arc<dyn Engine> = memory;
        let mut bootstrap = MockEngineBootstrap::new();
        bootstrap.expect_bootstrap().returning(move |_| Ok(engine.clone()));
        let loader = EngineLoader::with_capabilities(
            EngineConfig::default(),
            Arc::new(bootstrap),
            HostCapabilities { shared_memory: false },
        );
        AudioDecoder::new(Arc::new(loader), config)
    }

    fn wav_engine(size: usize) -> Arc<MemoryEngine> {
        Arc::new(MemoryEngine::new(move |args, files| {
            let input = arg_after(args, "-i").unwrap().to_string();
            assert!(files.contains_key(&input), "input {} not written", input);
            files.insert(args.last().unwrap().clone(), vec![0; size]);
            Ok(())
        }))
    }

    #[test]
    fn test_start_ms_prefers_start_then_seek() {
        assert_eq!(window(b"x", Some(1.2346), Some(9.0)).start_ms(), 1235);
        assert_eq!(window(b"x", None, Some(9.0)).start_ms(), 9000);
        assert_eq!(window(b"x", None, None).start_ms(), 0);
    }

    #[tokio::test]
    async fn test_shared_input_written_once() {
        let memory = wav_engine(1024);
        let decoder = decoder(memory.clone());
        let windows = vec![
            window(b"same media", Some(0.0), None),
            window(b"same media", Some(30.0), Some(30.0)),
        ];

        let decoded = decoder.decode_windows("dec", windows).await.unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].start_ms, 30_000);

        let history = memory.history();
        let inputs: Vec<_> = history.iter().map(|args| arg_after(args, "-i").unwrap()).collect();
        assert_eq!(inputs[0], inputs[1]);
        assert!(inputs[0].ends_with(SHARED_INPUT_NAME));
        assert_eq!(arg_after(&history[1], "-ss"), Some("30"));
        assert!(memory.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_inputs_use_own_names() {
        let memory = wav_engine(1024);
        let decoder = decoder(memory.clone());
        let windows = vec![window(b"a", None, None), window(b"b", None, None)];

        decoder.decode_windows("dec", windows).await.unwrap();
        let history = memory.history();
        assert!(arg_after(&history[0], "-i").unwrap().ends_with("win_0.bin"));
        assert!(arg_after(&history[1], "-i").unwrap().ends_with("win_1.bin"));
        assert!(memory.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_header_only_output_fails() {
        let memory = wav_engine(WAV_HEADER_BYTES - 1);
        let err = decoder(memory.clone())
            .decode_windows("dec", vec![window(b"media", None, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, XsyncError::Decode(ref msg) if msg.contains("too-small")));
        assert!(memory.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_is_decode_error() {
        let memory = Arc::new(MemoryEngine::new(|_, _| Err(XsyncError::Engine("Invalid data found".to_string()))));
        let err = decoder(memory)
            .decode_windows("dec", vec![window(b"media", None, None)])
            .await
            .unwrap_err();
        assert!(matches!(err, XsyncError::Decode(ref msg) if msg.starts_with("window 1")));
    }

    #[tokio::test]
    async fn test_no_windows_rejected() {
        let memory = wav_engine(1024);
        let err = decoder(memory).decode_windows("dec", Vec::new()).await.unwrap_err();
        assert!(matches!(err, XsyncError::Decode(_)));
    }

    #[tokio::test]
    async fn test_decode_job_timeout_is_distinct() {
        let memory = Arc::new(MemoryEngine::with_async_delay(std::time::Duration::from_secs(3), || {}, || {}));
        let config = DemuxConfig {
            decode_timeout_secs: 1,
            attempt_timeout_secs: 5,
            ..DemuxConfig::default()
        };
        let decoder = decoder_with(memory, config);

        let err = decoder
            .decode_windows("slow", vec![window(b"media", None, None)])
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("audio decode job timed out"));
    }
}
