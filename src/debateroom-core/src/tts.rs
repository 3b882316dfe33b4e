//! TTS module for text-to-speech synthesis using kokoro-tiny.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use crate::error::SynthesisError;

/// Kokoro renders 24 kHz mono.
pub const SAMPLE_RATE: u32 = 24_000;

#[async_trait]
pub trait TtsClient: Send {
    /// Render `text` to an encoded audio payload.
    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// One kokoro engine, shared by every session's voices.
#[derive(Clone)]
pub struct SharedEngine {
    engine: Arc<Mutex<TtsEngine>>,
    available_voices: Arc<Vec<String>>,
}

impl SharedEngine {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new() -> Result<Self, SynthesisError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| SynthesisError::Engine(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            available_voices: Arc::new(available_voices),
        })
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), SynthesisError> {
        if voice_id.is_empty() || !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(SynthesisError::UnknownVoice {
                voice: voice_id.to_string(),
                available: self.format_available_voices(),
            });
        }
        Ok(())
    }

    fn format_available_voices(&self) -> String {
        let mut voices: Vec<&String> = self.available_voices.iter().collect();
        voices.sort();

        voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// A client speaking with one voice.
    pub fn voice(&self, voice_id: &str) -> Result<KokoroTts, SynthesisError> {
        self.validate_voice(voice_id)?;
        Ok(KokoroTts {
            engine: self.clone(),
            voice: voice_id.to_string(),
        })
    }

    /// Synthesize text in chunks to handle long text.
    /// Kokoro-tiny has a strict limit on text length, so we split into small chunks.
    fn render(&self, text: &str, voice_id: &str) -> Result<Vec<f32>, SynthesisError> {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| SynthesisError::Engine("TTS engine lock poisoned".to_string()))?;

        let mut all_samples = Vec::new();

        for chunk in split_into_chunks(text, 200) {
            if chunk.trim().is_empty() {
                continue;
            }

            let samples = engine
                .synthesize(&chunk, Some(voice_id))
                .map_err(|e| SynthesisError::Engine(format!("Synthesis failed: {}", e)))?;

            all_samples.extend(samples);

            // 0.3s between chunks so words are not clipped
            all_samples.extend(vec![0.0; 7200]);
        }

        // 0.5s trailing pad
        all_samples.extend(vec![0.0; 12000]);

        Ok(all_samples)
    }
}

/// Kokoro-backed [`TtsClient`] bound to a voice.
pub struct KokoroTts {
    engine: SharedEngine,
    voice: String,
}

#[async_trait]
impl TtsClient for KokoroTts {
    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let engine = self.engine.clone();
        let voice = self.voice.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let samples = engine.render(&text, &voice)?;
            encode_wav(&samples, SAMPLE_RATE)
        })
        .await
        .map_err(|e| SynthesisError::Engine(format!("Synthesis task failed: {}", e)))?
    }
}

/// Encode mono float samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SynthesisError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Split text into chunks of at most `max_chars` characters, breaking at
/// sentence ends and then at commas.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_len = 0;

    let mut flush = |chunk: &mut String, len: &mut usize| {
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }
        chunk.clear();
        *len = 0;
    };

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let sentence_len = sentence.chars().count();

        if current_len + sentence_len > max_chars {
            flush(&mut current_chunk, &mut current_len);

            // A single sentence that is too long is split by commas
            if sentence_len > max_chars {
                for part in sentence.split_inclusive(',') {
                    let part_len = part.chars().count();
                    if current_len + part_len > max_chars {
                        flush(&mut current_chunk, &mut current_len);
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                    current_len += part_len + 1;
                }
                continue;
            }
        }

        current_chunk.push_str(sentence);
        current_chunk.push(' ');
        current_len += sentence_len + 1;
    }
    flush(&mut current_chunk, &mut current_len);

    chunks
}

/// File name for one turn's audio.
pub fn turn_audio_filename(code: &str, turn: u32, speaker: &str) -> String {
    let sanitized: String = speaker
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    format!("debateroom-{}-{:02}-{}.wav", code, turn, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_split_measures_characters_not_bytes() {
        // 10 sentences of 30 Hangul syllables each (90 bytes per sentence).
        let sentence = format!("{}.", "가".repeat(29));
        let text = vec![sentence.as_str(); 10].join(" ");

        let chunks = split_into_chunks(&text, 200);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            let chars = chunk.chars().count();
            assert!(chars <= 200, "chunk of {chars} chars");
            assert!(chars > 66, "chunk of {chars} chars");
        }
    }

    #[test]
    fn test_split_keeps_all_text() {
        let text = "학교는 연구를 위한 공간입니다. 그렇지 않습니다!";
        let joined = split_into_chunks(text, 1000).join(" ");
        assert_eq!(joined, text);
    }

    #[test]
    fn test_encode_wav_header_and_length() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.5], SAMPLE_RATE).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 44-byte header + 4 samples * 2 bytes
        assert_eq!(bytes.len(), 44 + 8);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[3], i16::MAX);
    }

    #[test]
    fn test_turn_audio_filename() {
        assert_eq!(turn_audio_filename("AB", 3, "gpt 4"), "debateroom-AB-03-gpt_4.wav");
    }
}
