/// Engine command representation: an argument vector plus a human-readable description
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub args: Vec<String>,
    pub description: String,
}

impl EngineCommand {
    /// Create a new engine command
    pub fn new<S: Into<String>>(description: S) -> Self {
        Self {
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<S: Into<String>>(self, name: S) -> Self {
        self.arg("-i").arg(name)
    }

    /// Add output file
    pub fn output<S: Into<String>>(self, name: S) -> Self {
        self.arg(name)
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Generous probing so late-starting subtitle streams are discovered
    pub fn probe_limits(self, analyze_duration: &str, probe_size: &str) -> Self {
        self.arg("-analyzeduration")
            .arg(analyze_duration)
            .arg("-probesize")
            .arg(probe_size)
    }

    /// Select streams
    pub fn map<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-map").arg(selector)
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Force container format
    pub fn format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-f").arg(format)
    }

    /// First index used by a numbered output pattern
    pub fn start_number(self, n: u32) -> Self {
        self.arg("-start_number").arg(n.to_string())
    }

    /// Regenerate presentation timestamps and zero-base the input timeline
    pub fn regenerate_timestamps(self) -> Self {
        self.arg("-fflags")
            .arg("+genpts")
            .arg("-copyts")
            .arg("-start_at_zero")
    }

    /// Keep source timestamps but shift negatives to zero
    pub fn zero_based_copy(self) -> Self {
        self.arg("-copyts").arg("-avoid_negative_ts").arg("make_zero")
    }

    /// Clamp negative timestamps and drop muxer delays on output
    pub fn clamp_output_timestamps(self) -> Self {
        self.arg("-avoid_negative_ts")
            .arg("make_zero")
            .arg("-max_interleave_delta")
            .arg("0")
            .arg("-muxpreload")
            .arg("0")
            .arg("-muxdelay")
            .arg("0")
    }

    /// Derive subtitle end times from the next cue where missing
    pub fn fix_sub_duration(self) -> Self {
        self.arg("-fix_sub_duration")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Seek before decoding (input option, so it must precede `input`)
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(seconds.to_string())
    }

    /// Limit output duration
    pub fn duration(self, seconds: f64) -> Self {
        self.arg("-t").arg(seconds.to_string())
    }
}

/// Builder for every command the demux and decode paths issue
#[derive(Debug, Clone)]
pub struct EngineCommandBuilder {
    analyze_duration: String,
    probe_size: String,
}

impl EngineCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(analyze_duration: S1, probe_size: S2) -> Self {
        Self {
            analyze_duration: analyze_duration.into(),
            probe_size: probe_size.into(),
        }
    }

    fn probed(&self, description: &str) -> EngineCommand {
        EngineCommand::new(description)
            .overwrite()
            .probe_limits(&self.analyze_duration, &self.probe_size)
    }

    /// Map every subtitle stream straight to numbered SRT files
    pub fn extract_all_srt(&self, input: &str, output_pattern: &str) -> EngineCommand {
        self.probed("Subtitle extraction (srt)")
            .input(input)
            .map("0:s?")
            .subtitle_codec("srt")
            .start_number(1)
            .output(output_pattern)
    }

    /// Map every subtitle stream of a remote stream to numbered WebVTT files
    pub fn extract_all_vtt(&self, stream_url: &str, output_pattern: &str) -> EngineCommand {
        self.probed("Subtitle extraction from stream (webvtt)")
            .input(stream_url)
            .no_video()
            .arg("-an")
            .map("0:s?")
            .subtitle_codec("webvtt")
            .start_number(1)
            .output(output_pattern)
    }

    /// Remux every subtitle stream into one Matroska container without re-encoding
    pub fn copy_all_subtitles(&self, input: &str, container: &str) -> EngineCommand {
        self.probed("Subtitle stream copy")
            .input(input)
            .map("0:s?")
            .subtitle_codec("copy")
            .format("matroska")
            .output(container)
    }

    /// Split one subtitle stream out of a container (0-based stream index)
    pub fn split_stream(&self, container: &str, stream: usize, output: &str) -> EngineCommand {
        self.probed(&format!("Subtitle stream {} split", stream))
            .input(container)
            .map(format!("0:s:{}", stream))
            .subtitle_codec("copy")
            .output(output)
    }

    /// Convert the first subtitle stream of `input` to SRT
    pub fn convert_to_srt(&self, input: &str, output: &str) -> EngineCommand {
        self.probed(&format!("Convert {} to srt", input))
            .input(input)
            .map("0:s:0")
            .subtitle_codec("srt")
            .output(output)
    }

    /// Timestamp-normalized extraction of every subtitle stream
    pub fn normalized_extract(&self, input: &str, output_pattern: &str) -> EngineCommand {
        EngineCommand::new("Subtitle extraction (timestamp normalized)")
            .overwrite()
            .regenerate_timestamps()
            .probe_limits(&self.analyze_duration, &self.probe_size)
            .input(input)
            .map("0:s?")
            .subtitle_codec("srt")
            .fix_sub_duration()
            .clamp_output_timestamps()
            .start_number(1)
            .output(output_pattern)
    }

    /// Isolate one subtitle stream with copied, zero-based timestamps
    pub fn isolate_stream(&self, input: &str, stream: usize, output: &str) -> EngineCommand {
        self.probed(&format!("Subtitle stream {} isolate", stream))
            .zero_based_copy()
            .input(input)
            .map(format!("0:s:{}", stream))
            .subtitle_codec("copy")
            .output(output)
    }

    /// Convert an isolated stream to SRT with timestamp regeneration
    pub fn normalized_convert(&self, input: &str, output: &str) -> EngineCommand {
        EngineCommand::new(format!("Convert {} to srt (timestamp normalized)", input))
            .overwrite()
            .regenerate_timestamps()
            .arg("-avoid_negative_ts")
            .arg("make_zero")
            .probe_limits(&self.analyze_duration, &self.probe_size)
            .input(input)
            .map("0:s:0")
            .subtitle_codec("srt")
            .fix_sub_duration()
            .output(output)
    }

    /// Decode one audio window to 16 kHz mono PCM WAV
    pub fn decode_window(
        &self,
        input: &str,
        output: &str,
        seek_secs: Option<f64>,
        duration_secs: Option<f64>,
    ) -> EngineCommand {
        let mut cmd = EngineCommand::new("Audio window decode").overwrite();
        if let Some(seek) = seek_secs.filter(|s| *s > 0.0) {
            cmd = cmd.seek(seek);
        }
        cmd = cmd
            .input(input)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(16000)
            .audio_channels(1);
        if let Some(duration) = duration_secs.filter(|d| *d > 0.0) {
            cmd = cmd.duration(duration);
        }
        cmd.output(output)
    }
}
