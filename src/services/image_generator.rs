use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::{
    config::Config,
    constants::{
        IMAGE_GENERATION_BACKOFF_BASE_MS, IMAGE_GENERATION_MAX_ATTEMPTS,
        IMAGE_REQUEST_TIMEOUT_SECS, PNG_SIGNATURE,
    },
    error::{AppError, Result},
};

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub seed: Option<i64>,
}

/// Final sprite after optional background removal.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub seed: Option<i64>,
    pub background_removed: bool,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage>;
    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>>;
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

// ==================== RETRY ====================
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: IMAGE_GENERATION_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(IMAGE_GENERATION_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

/// Generates an image, retrying failures and non-PNG payloads with
/// exponential backoff. Returns the last error once attempts run out.
pub async fn generate_with_retry(
    generator: &dyn ImageGenerator,
    prompt: &str,
    policy: RetryPolicy,
) -> Result<GeneratedImage> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = AppError::ExternalAPI("image generation was not attempted".to_string());

    for attempt in 1..=max_attempts {
        match generator.generate(prompt).await {
            Ok(image) if is_png(&image.bytes) => {
                if attempt > 1 {
                    tracing::info!("Image generation succeeded on attempt {}", attempt);
                }
                return Ok(image);
            }
            Ok(image) => {
                tracing::warn!(
                    "Image generation attempt {}/{} returned invalid PNG ({} bytes)",
                    attempt,
                    max_attempts,
                    image.bytes.len()
                );
                last_error = AppError::ExternalAPI("provider returned an invalid PNG".to_string());
            }
            Err(err) => {
                tracing::warn!(
                    "Image generation attempt {}/{} failed: {}",
                    attempt,
                    max_attempts,
                    err
                );
                last_error = err;
            }
        }

        if attempt < max_attempts {
            sleep(policy.delay_after(attempt)).await;
        }
    }

    tracing::error!("Image generation failed after {} attempts", max_attempts);
    Err(last_error)
}

/// Generates a sprite and tries once to strip its background, keeping the
/// original image when removal fails.
pub async fn generate_sprite(
    generator: &dyn ImageGenerator,
    prompt: &str,
    policy: RetryPolicy,
) -> Result<ProcessedImage> {
    let image = generate_with_retry(generator, prompt, policy).await?;

    match generator.remove_background(&image.bytes).await {
        Ok(bytes) if is_png(&bytes) => Ok(ProcessedImage {
            bytes,
            seed: image.seed,
            background_removed: true,
        }),
        Ok(_) => {
            tracing::warn!("Background removal returned invalid PNG, keeping original");
            Ok(ProcessedImage {
                bytes: image.bytes,
                seed: image.seed,
                background_removed: false,
            })
        }
        Err(err) => {
            tracing::warn!("Background removal failed, keeping original: {}", err);
            Ok(ProcessedImage {
                bytes: image.bytes,
                seed: image.seed,
                background_removed: false,
            })
        }
    }
}

// ==================== STABILITY API ====================
#[derive(Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Serialize)]
struct TextToImageRequest<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    cfg_scale: u32,
    height: u32,
    width: u32,
    samples: u32,
    steps: u32,
}

#[derive(Deserialize)]
struct TextToImageResponse {
    artifacts: Vec<Artifact>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    base64: String,
    seed: Option<i64>,
    finish_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StabilityClient {
    base_url: String,
    engine: String,
    api_key: Option<String>,
    client: Client,
}

impl StabilityClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(IMAGE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.stability_api_url.trim_end_matches('/').to_string(),
            engine: config.stability_engine.clone(),
            api_key: config.stability_api_key.clone(),
            client,
        })
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::ExternalAPI("STABILITY_API_KEY is not configured".to_string()))
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("status {}: {}", status, body.chars().take(200).collect::<String>())
    }
}

#[async_trait]
impl ImageGenerator for StabilityClient {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let url = format!(
            "{}/v1/generation/{}/text-to-image",
            self.base_url, self.engine
        );
        let body = TextToImageRequest {
            text_prompts: vec![TextPrompt {
                text: prompt,
                weight: 1.0,
            }],
            cfg_scale: 7,
            height: 1024,
            width: 1024,
            samples: 1,
            steps: 30,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("text-to-image request: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "text-to-image {}",
                Self::error_body(response).await
            )));
        }

        let payload: TextToImageResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("text-to-image decode: {}", e)))?;
        let artifact = payload
            .artifacts
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ExternalAPI("text-to-image returned no artifacts".into()))?;
        if let Some(reason) = artifact.finish_reason.as_deref() {
            if reason != "SUCCESS" {
                return Err(AppError::ExternalAPI(format!(
                    "text-to-image finished with {}",
                    reason
                )));
            }
        }

        let bytes = STANDARD
            .decode(artifact.base64.as_bytes())
            .map_err(|e| AppError::ExternalAPI(format!("artifact decode: {}", e)))?;
        Ok(GeneratedImage {
            bytes,
            seed: artifact.seed,
        })
    }

    async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
        let url = format!("{}/v2beta/stable-image/edit/remove-background", self.base_url);
        let part = Part::bytes(png.to_vec())
            .file_name("sprite.png")
            .mime_str("image/png")
            .map_err(|e| AppError::Internal(format!("multipart part: {}", e)))?;
        let form = Form::new().part("image", part).text("output_format", "png");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key()?)
            .header(reqwest::header::ACCEPT, "image/*")
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("remove-background request: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalAPI(format!(
                "remove-background {}",
                Self::error_body(response).await
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("remove-background body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

// ==================== TEST DOUBLES ====================
#[cfg(test)]
pub(crate) fn test_png(marker: u8) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R', marker]);
    bytes
}

/// Generator that fails a fixed number of times before succeeding.
#[cfg(test)]
pub(crate) struct ScriptedGenerator {
    failures_before_success: u32,
    remove_background_ok: bool,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl ScriptedGenerator {
    pub(crate) fn succeeding() -> Self {
        Self::failing_times(0)
    }

    pub(crate) fn failing_times(failures_before_success: u32) -> Self {
        Self {
            failures_before_success,
            remove_background_ok: true,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub(crate) fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    pub(crate) fn without_background_removal(mut self) -> Self {
        self.remove_background_ok = false;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<GeneratedImage> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(AppError::ExternalAPI(format!("scripted failure {}", call + 1)));
        }
        Ok(GeneratedImage {
            bytes: test_png(1),
            seed: Some(42),
        })
    }

    async fn remove_background(&self, _png: &[u8]) -> Result<Vec<u8>> {
        if self.remove_background_ok {
            Ok(test_png(2))
        } else {
            Err(AppError::ExternalAPI("scripted background failure".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_delay() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
        }
    }

    fn client_for(server: &wiremock::MockServer) -> StabilityClient {
        let mut config = crate::config::test_config();
        config.stability_api_url = server.uri();
        config.stability_api_key = Some("sk-test".to_string());
        StabilityClient::new(&config).expect("client")
    }

    #[test]
    fn png_signature_check() {
        assert!(is_png(&test_png(0)));
        assert!(!is_png(b"GIF89a"));
        assert!(!is_png(&PNG_SIGNATURE[..4]));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn succeeds_after_two_failures() {
        let generator = ScriptedGenerator::failing_times(2);
        let image = generate_with_retry(&generator, "sprout", no_delay())
            .await
            .expect("third attempt succeeds");
        assert!(is_png(&image.bytes));
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let generator = ScriptedGenerator::always_failing();
        let err = generate_with_retry(&generator, "sprout", no_delay())
            .await
            .expect_err("exhausted");
        assert!(matches!(err, AppError::ExternalAPI(_)));
        assert_eq!(generator.calls(), 3);
    }

    /// Serves a non-PNG payload first, then a real sprite.
    struct CorruptOnceGenerator {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl ImageGenerator for CorruptOnceGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedImage> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let bytes = if call == 0 { b"<html>".to_vec() } else { test_png(1) };
            Ok(GeneratedImage { bytes, seed: None })
        }

        async fn remove_background(&self, png: &[u8]) -> Result<Vec<u8>> {
            Ok(png.to_vec())
        }
    }

    #[tokio::test]
    async fn invalid_png_uses_up_an_attempt() {
        let generator = CorruptOnceGenerator {
            calls: std::sync::atomic::AtomicU32::new(0),
        };
        let image = generate_with_retry(&generator, "sprout", no_delay())
            .await
            .expect("second attempt succeeds");
        assert_eq!(image.bytes, test_png(1));
        assert_eq!(generator.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_attempts() {
        let generator = ScriptedGenerator::failing_times(2);
        let started = tokio::time::Instant::now();
        generate_with_retry(&generator, "sprout", RetryPolicy::default())
            .await
            .expect("succeeds");
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn background_failure_keeps_original() {
        let generator = ScriptedGenerator::succeeding().without_background_removal();
        let sprite = generate_sprite(&generator, "sprout", no_delay())
            .await
            .expect("sprite");
        assert!(!sprite.background_removed);
        assert_eq!(sprite.bytes, test_png(1));
        assert_eq!(sprite.seed, Some(42));
    }

    #[tokio::test]
    async fn background_success_replaces_image() {
        let generator = ScriptedGenerator::succeeding();
        let sprite = generate_sprite(&generator, "sprout", no_delay())
            .await
            .expect("sprite");
        assert!(sprite.background_removed);
        assert_eq!(sprite.bytes, test_png(2));
    }

    #[tokio::test]
    async fn stability_text_to_image_decodes_artifact() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path(
                "/v1/generation/test-engine/text-to-image",
            ))
            .and(wiremock::matchers::header("authorization", "Bearer sk-test"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "artifacts": [{
                        "base64": STANDARD.encode(test_png(9)),
                        "seed": 1234,
                        "finishReason": "SUCCESS"
                    }]
                })),
            )
            .mount(&server)
            .await;

        let image = client_for(&server).generate("a fern").await.expect("image");
        assert_eq!(image.bytes, test_png(9));
        assert_eq!(image.seed, Some(1234));
    }

    #[tokio::test]
    async fn stability_error_status_is_external_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate("a fern")
            .await
            .expect_err("500 fails");
        assert!(matches!(err, AppError::ExternalAPI(_)));
    }

    #[tokio::test]
    async fn stability_remove_background_returns_bytes() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path(
                "/v2beta/stable-image/edit/remove-background",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_bytes(test_png(5)))
            .mount(&server)
            .await;

        let bytes = client_for(&server)
            .remove_background(&test_png(1))
            .await
            .expect("bytes");
        assert_eq!(bytes, test_png(5));
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_request() {
        let client = StabilityClient::new(&crate::config::test_config()).expect("client");
        let err = client.generate("a fern").await.expect_err("no key");
        assert!(matches!(err, AppError::ExternalAPI(_)));
    }
}
