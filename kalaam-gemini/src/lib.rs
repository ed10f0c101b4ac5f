use async_trait::async_trait;
use kalaam_core::{CoreError, Interpreter, ProviderConfig, SpeechSynthesizer, SynthesizedSpeech};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transient failures are retried once at most
const MAX_RETRIES: u32 = 1;

const RECITE_PROMPT: &str = "Please recite this Urdu poetry clearly and emotionally:\n\n";

const INTERPRET_PROMPT: &str = "You are an Islamic scholar and Urdu linguist. \
    Explain the following poetry verses (Naat/Hamd) in simple but beautiful Urdu. \
    Focus on spiritual meaning and explain difficult words. \
    Output ONLY the Urdu explanation text. \n\n";

/// Gemini `generateContent` client for recitation and interpretation
pub struct GeminiProvider {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    tts_model: String,
    text_model: String,
    voice_name: String,
}

impl GeminiProvider {
    /// Create a provider from the `[provider]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ProviderConfig) -> Result<Self, CoreError> {
        let base_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent("Kalaam/1.0")
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            tts_model: config.tts_model.clone(),
            text_model: config.text_model.clone(),
            voice_name: config.voice_name.clone(),
        })
    }

    /// Call `generateContent`, describing any failure as a reason string.
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!("Gemini POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini returned status {} for {}", status, model);
            return Err(format!("Gemini returned status {status}: {}", snippet(&body)));
        }

        response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, CoreError> {
        info!(
            "Requesting recitation from {} ({} chars, voice {})",
            self.tts_model,
            text.chars().count(),
            self.voice_name
        );

        let request = GenerateContentRequest::speech(text, &self.voice_name);
        let response = self
            .generate(&self.tts_model, &request)
            .await
            .map_err(|reason| CoreError::Synthesis {
                provider: SpeechSynthesizer::name(self).to_string(),
                reason,
            })?;

        let speech = response
            .audio_payload()
            .ok_or_else(|| CoreError::ProviderEmptyResponse {
                provider: SpeechSynthesizer::name(self).to_string(),
            })?;
        debug!(
            "Received {} bytes of base64 audio ({})",
            speech.data.len(),
            speech.mime_type.as_deref().unwrap_or("no mime type")
        );
        Ok(speech)
    }
}

#[async_trait]
impl Interpreter for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn interpret(&self, text: &str) -> Result<String, CoreError> {
        info!("Requesting interpretation from {}", self.text_model);

        let request = GenerateContentRequest::text(format!("{INTERPRET_PROMPT}{text}"));
        let response = self
            .generate(&self.text_model, &request)
            .await
            .map_err(|reason| CoreError::Interpretation {
                provider: Interpreter::name(self).to_string(),
                reason,
            })?;

        let answer = response.text();
        if answer.trim().is_empty() {
            return Err(CoreError::Interpretation {
                provider: Interpreter::name(self).to_string(),
                reason: "response contained no text".to_string(),
            });
        }
        Ok(answer)
    }
}

fn snippet(body: &str) -> &str {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

impl GenerateContentRequest {
    fn text(prompt: String) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: None,
        }
    }

    fn speech(text: &str, voice_name: &str) -> Self {
        Self {
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            }),
            ..Self::text(format!("{RECITE_PROMPT}{text}"))
        }
    }
}

/// Response from `generateContent`
/// Note: only the fields read below are modelled; serde ignores the rest.
#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    mime_type: Option<String>,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Audio of the first part of the first candidate
    fn audio_payload(self) -> Option<SynthesizedSpeech> {
        let mut candidates = self.candidates.into_iter();
        let part = candidates.next()?.content?.parts.into_iter().next()?;
        let inline = part.inline_data.filter(|inline| !inline.data.trim().is_empty())?;
        Some(SynthesizedSpeech {
            data: inline.data,
            mime_type: inline.mime_type,
        })
    }

    /// Concatenated text parts of the first candidate
    fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::response::IntoResponse;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn parse(body: &str) -> GenerateContentResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_audio_payload_from_first_part() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"inlineData":{"mimeType":"audio/L16;rate=24000","data":"AAAA"}}
            ]}}]}"#,
        );
        let speech = response.audio_payload().unwrap();
        assert_eq!(speech.data, "AAAA");
        assert_eq!(speech.sample_rate(), Some(24_000));
    }

    #[test]
    fn test_audio_payload_missing() {
        assert!(parse(r#"{"candidates":[]}"#).audio_payload().is_none());
        assert!(parse("{}").audio_payload().is_none());
        assert!(parse(r#"{"candidates":[{"content":{"parts":[{"text":"sorry"}]}}]}"#)
            .audio_payload()
            .is_none());
        assert!(
            parse(r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":""}}]}}]}"#)
                .audio_payload()
                .is_none()
        );
    }

    #[test]
    fn test_text_concatenates_parts() {
        let response = parse(
            r#"{"candidates":[
                {"content":{"parts":[{"text":"پہلا "},{"text":"دوسرا"}]}},
                {"content":{"parts":[{"text":"ignored"}]}}
            ]}"#,
        );
        assert_eq!(response.text(), "پہلا دوسرا");
        assert_eq!(parse("{}").text(), "");
    }

    #[test]
    fn test_speech_request_shape() {
        let request = GenerateContentRequest::speech("مصرع", "Zephyr");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["contents"][0]["parts"][0]["text"],
            format!("{RECITE_PROMPT}مصرع")
        );
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );

        let text = serde_json::to_value(GenerateContentRequest::text("x".to_string())).unwrap();
        assert!(text.get("generationConfig").is_none());
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let long = "ک".repeat(300);
        assert_eq!(snippet(&long).chars().count(), 200);
        assert_eq!(snippet("short"), "short");
    }

    #[derive(Default)]
    struct Seen {
        path: String,
        api_key: String,
        body: Value,
    }

    async fn serve(reply: Value, status: StatusCode) -> (String, Arc<Mutex<Seen>>) {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let recorder = Arc::clone(&seen);
        let router = Router::new().fallback(
            move |uri: Uri, headers: HeaderMap, Json(body): Json<Value>| {
                let recorder = Arc::clone(&recorder);
                let reply = reply.clone();
                async move {
                    {
                        let mut seen = recorder.lock().unwrap();
                        seen.path = uri.path().to_string();
                        seen.api_key = headers
                            .get("x-goog-api-key")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.body = body;
                    }
                    (status, Json(reply)).into_response()
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/v1beta/"), seen)
    }

    fn provider(base_url: String) -> GeminiProvider {
        GeminiProvider::new(&ProviderConfig {
            api_key: "test-key".to_string(),
            base_url,
            ..ProviderConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_posts_to_tts_model() {
        let reply = json!({"candidates":[{"content":{"parts":[{"inlineData":{"data":"UENN"}}]}}]});
        let (base, seen) = serve(reply, StatusCode::OK).await;

        let speech = provider(base).synthesize("سلام").await.unwrap();
        assert_eq!(speech, SynthesizedSpeech::new("UENN"));

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.path,
            "/v1beta/models/gemini-2.5-flash-preview-tts:generateContent"
        );
        assert_eq!(seen.api_key, "test-key");
        assert_eq!(
            seen.body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
    }

    #[tokio::test]
    async fn test_synthesize_passes_mime_type_through() {
        let reply = json!({"candidates":[{"content":{"parts":[{"inlineData":{
            "mimeType":"audio/L16;codec=pcm;rate=16000",
            "data":"UENN"
        }}]}}]});
        let (base, _) = serve(reply, StatusCode::OK).await;

        let speech = provider(base).synthesize("سلام").await.unwrap();
        assert_eq!(speech.sample_rate(), Some(16_000));
    }

    #[tokio::test]
    async fn test_synthesize_without_audio_is_empty_response() {
        let reply = json!({"candidates":[{"content":{"parts":[{"text":"no"}]}}]});
        let (base, _) = serve(reply, StatusCode::OK).await;

        let err = provider(base).synthesize("سلام").await.unwrap_err();
        assert!(matches!(err, CoreError::ProviderEmptyResponse { .. }));
    }

    #[tokio::test]
    async fn test_synthesize_reports_client_errors() {
        let reply = json!({"error":{"message":"API key not valid"}});
        let (base, _) = serve(reply, StatusCode::BAD_REQUEST).await;

        let err = provider(base).synthesize("سلام").await.unwrap_err();
        assert!(
            matches!(err, CoreError::Synthesis { ref reason, .. } if reason.contains("400")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_interpret_uses_text_model() {
        let reply = json!({"candidates":[{"content":{"parts":[{"text":"روحانی معنی"}]}}]});
        let (base, seen) = serve(reply, StatusCode::OK).await;

        let answer = provider(base).interpret("مصرع").await.unwrap();
        assert_eq!(answer, "روحانی معنی");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.path, "/v1beta/models/gemini-3-flash-preview:generateContent");
        let prompt = seen.body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with("You are an Islamic scholar"));
        assert!(prompt.ends_with("مصرع"));
    }

    #[tokio::test]
    async fn test_interpret_rejects_blank_answer() {
        let (base, _) = serve(json!({"candidates":[]}), StatusCode::OK).await;
        let err = provider(base).interpret("مصرع").await.unwrap_err();
        assert!(matches!(err, CoreError::Interpretation { .. }));
    }
}
