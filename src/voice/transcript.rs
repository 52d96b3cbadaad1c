use log::debug;

use crate::voice::TranscriptionResult;

/// Accumulating transcript for one candidate turn.
///
/// Interim results overwrite each other; final results are appended. The
/// rendered text is what the silence timer hands to `SilenceDetected` and
/// what `stop_listening` returns.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    finals: Vec<String>,
    interim: Option<String>,

    // Stats
    word_count: usize,
    final_segment_count: usize,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: &TranscriptionResult) {
        if result.is_final {
            let text = result.transcript.trim();
            if !text.is_empty() {
                debug!("final segment: {:?}", text);
                self.word_count += text.split_whitespace().count();
                self.final_segment_count += 1;
                self.finals.push(text.to_string());
            }
            // A final supersedes whatever interim preceded it.
            self.interim = None;
        } else {
            self.interim = Some(result.transcript.trim().to_string());
        }
    }

    /// Finalized segments plus the live interim, whitespace-normalized.
    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = self.finals.iter().map(|s| s.as_str()).collect();
        if let Some(interim) = &self.interim {
            if !interim.is_empty() {
                parts.push(interim);
            }
        }
        parts
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Finalized segments only.
    pub fn final_text(&self) -> String {
        self.finals.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.interim.as_deref().map_or(true, |s| s.is_empty())
    }

    pub fn stats(&self) -> TranscriptStats {
        TranscriptStats {
            word_count: self.word_count,
            final_segment_count: self.final_segment_count,
        }
    }

    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim = None;
        self.word_count = 0;
        self.final_segment_count = 0;
    }
}

/// Running counters over the finalized portion of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptStats {
    pub word_count: usize,
    pub final_segment_count: usize,
}
