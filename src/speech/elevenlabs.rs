//! `ElevenLabs` speech synthesis client.
//!
//! The synthesis endpoint streams audio chunks; the stream is fully drained
//! and concatenated before the exchange responds.

use crate::config::SpeechConfig;
use crate::providers::api_error;
use crate::speech::traits::{SpeechProvider, VoiceInfo};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<ElevenLabsVoice>,
}

#[derive(Debug, Deserialize)]
struct ElevenLabsVoice {
    voice_id: String,
    name: String,
}

pub struct ElevenLabsSpeech {
    api_key: Option<String>,
    base_url: String,
    voice_id: String,
    model_id: String,
    output_format: String,
    client: Client,
}

impl ElevenLabsSpeech {
    pub fn new(speech: &SpeechConfig) -> Self {
        Self::with_base_url(speech, None)
    }

    pub fn with_base_url(speech: &SpeechConfig, base_url: Option<&str>) -> Self {
        Self {
            api_key: speech
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToString::to_string),
            base_url: base_url
                .map_or("https://api.elevenlabs.io", |u| u.trim_end_matches('/'))
                .to_string(),
            voice_id: speech.voice_id.clone(),
            model_id: speech.model_id.clone(),
            output_format: speech.output_format.clone(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn synthesis_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format={}",
            self.base_url, self.voice_id, self.output_format
        )
    }

    fn auth(&self) -> anyhow::Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("ElevenLabs credentials not set. Set ELEVENLABS_API_KEY.")
        })
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsSpeech {
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });

        let response = self
            .client
            .post(self.synthesis_url())
            .header("xi-api-key", self.auth()?)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("ElevenLabs", response).await);
        }

        // Drain the chunked audio stream into one buffer.
        let mut audio = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            audio.extend_from_slice(&chunk?);
        }

        tracing::debug!(
            chars = text.len(),
            bytes = audio.len(),
            "synthesized speech"
        );
        Ok(audio)
    }

    async fn list_voices(&self) -> anyhow::Result<Vec<VoiceInfo>> {
        let url = format!("{}/v1/voices", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("xi-api-key", self.auth()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error("ElevenLabs", response).await);
        }

        let voices: VoicesResponse = response.json().await?;
        Ok(voices
            .voices
            .into_iter()
            .map(|v| VoiceInfo {
                voice_id: v.voice_id,
                name: v.name,
            })
            .collect())
    }

    fn voice_id(&self) -> &str {
        &self.voice_id
    }
}
