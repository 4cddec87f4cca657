use once_cell::sync::Lazy;
use regex::Regex;

use crate::timeline::format_srt_ms;

static VTT_TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(\d+):)?(\d{2}):(\d{2})\.(\d{3})\s+-->\s+(?:(\d+):)?(\d{2}):(\d{2})\.(\d{3})")
        .expect("vtt timing pattern is valid")
});

// Voice, class, language and ruby spans plus inline timestamps; SRT keeps only i/b/u
static VTT_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</?(?:v|c|lang|ruby|rt)(?:[ .][^>]*)?>|<\d+(?::\d{2}){1,2}\.\d{3}>")
        .expect("vtt markup pattern is valid")
});

/// One WebVTT cue with its markup reduced to what SRT understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VttCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Parse the cues of a WebVTT document.
///
/// Header, NOTE, STYLE and REGION blocks carry no timing line and are skipped, as
/// are cues whose text is empty once markup is stripped.
pub fn parse_vtt(document: &str) -> Vec<VttCue> {
    let document = document.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in document.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if let Some(cue) = parse_block(&block) {
            cues.push(cue);
        }
        block.clear();
    }
    cues
}

fn parse_block(block: &[&str]) -> Option<VttCue> {
    let timing = block.iter().position(|line| VTT_TIMING.is_match(line))?;
    let caps = VTT_TIMING.captures(block[timing])?;
    let field = |i: usize| {
        caps.get(i)
            .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
    };
    let start_ms = field(1)? * 3_600_000 + field(2)? * 60_000 + field(3)? * 1_000 + field(4)?;
    let end_ms = field(5)? * 3_600_000 + field(6)? * 60_000 + field(7)? * 1_000 + field(8)?;

    let text = block[timing + 1..]
        .iter()
        .map(|line| strip_markup(line))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(VttCue {
        start_ms,
        end_ms: end_ms.max(start_ms),
        text: text.to_string(),
    })
}

fn strip_markup(line: &str) -> String {
    VTT_MARKUP
        .replace_all(line, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Render cues as an SRT document numbered from 1
pub fn cues_to_srt(cues: &[VttCue]) -> String {
    cues.iter()
        .enumerate()
        .map(|(i, cue)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_srt_ms(cue.start_ms),
                format_srt_ms(cue.end_ms),
                cue.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// WebVTT document to SRT text; `None` when the document holds no cues
pub fn vtt_to_srt(document: &str) -> Option<String> {
    let cues = parse_vtt(document);
    if cues.is_empty() {
        None
    } else {
        Some(cues_to_srt(&cues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::cue_starts_ms;

    const SAMPLE: &str = "\u{feff}WEBVTT - episode 3\r\n\r\nNOTE recorded live\r\n\r\nSTYLE\r\n::cue { color: yellow }\r\n\r\nintro\r\n00:01.000 --> 00:03.500 align:start position:10%\r\n<v Narrator>Previously</v>\r\n\r\n01:02:03.004 --> 01:02:05.000\r\n<i>Fish &amp; chips</i>\r\nsecond <c.loud>line</c>\r\n";

    #[test]
    fn test_parse_skips_non_cue_blocks() {
        let cues = parse_vtt(SAMPLE);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1_000);
        assert_eq!(cues[0].end_ms, 3_500);
        assert_eq!(cues[0].text, "Previously");
        assert_eq!(cues[1].start_ms, 3_723_004);
        assert_eq!(cues[1].text, "<i>Fish & chips</i>\nsecond line");
    }

    #[test]
    fn test_srt_output_is_numbered_and_parseable() {
        let srt = vtt_to_srt(SAMPLE).unwrap();
        assert!(srt.starts_with("1\n00:00:01,000 --> 00:00:03,500\nPreviously\n\n2\n01:02:03,004 --> "));
        assert!(!srt.ends_with("\n\n"));
        assert_eq!(cue_starts_ms(&srt), vec![1_000, 3_723_004]);
    }

    #[test]
    fn test_inline_timestamps_and_empty_cues_dropped() {
        let doc = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nkaraoke <00:00:01.500>word\n\n00:00:03.000 --> 00:00:04.000\n<v Nobody></v>\n";
        let cues = parse_vtt(doc);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "karaoke word");
    }

    #[test]
    fn test_backwards_end_is_clamped() {
        let cues = parse_vtt("WEBVTT\n\n00:05.000 --> 00:04.000\nodd\n");
        assert_eq!(cues[0].end_ms, 5_000);
    }

    #[test]
    fn test_document_without_cues() {
        assert_eq!(vtt_to_srt("WEBVTT\n\nNOTE nothing here\n"), None);
        assert!(parse_vtt("").is_empty());
    }
}
