use std::path::PathBuf;
use std::str::FromStr;

use zeroize::Zeroizing;

use super::{ConfigError, ServerConfig, TlsConfig};

/// Every environment variable the server reads.
pub(super) const ALL_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "UPSTREAM_URL",
    "OPENAI_API_KEY",
    "UPSTREAM_PROTOCOL_VERSION",
    "UPSTREAM_CONNECT_TIMEOUT_SECS",
    "INBOUND_QUEUE_CAPACITY",
    "TEARDOWN_TIMEOUT_MS",
    "SESSION_MODALITIES",
    "SESSION_INSTRUCTIONS",
    "SESSION_VOICE",
    "SESSION_INPUT_AUDIO_FORMAT",
    "SESSION_OUTPUT_AUDIO_FORMAT",
    "SESSION_TRANSCRIPTION_MODEL",
    "SESSION_TEMPERATURE",
    "SESSION_MAX_RESPONSE_OUTPUT_TOKENS",
    "SESSION_VAD_THRESHOLD",
    "SESSION_VAD_PREFIX_PADDING_MS",
    "SESSION_VAD_SILENCE_DURATION_MS",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

/// Read a variable, treating blank values as unset.
fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

/// `"inf"` means no cap.
pub(super) fn parse_max_tokens(name: &str, raw: &str) -> Result<Option<u32>, ConfigError> {
    if raw.eq_ignore_ascii_case("inf") {
        return Ok(None);
    }
    raw.parse::<u32>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{raw}': expected a number or \"inf\" ({e})"),
        })
}

pub(super) fn parse_modalities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}

/// Build the configuration from defaults and environment variables.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse("PORT")? {
        config.port = port;
    }
    config.tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => {
            return Err(ConfigError::Invalid(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
            ));
        }
    };

    let upstream = &mut config.upstream;
    if let Some(url) = var("UPSTREAM_URL") {
        upstream.url = url;
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        upstream.api_key = Some(Zeroizing::new(key));
    }
    if let Ok(version) = std::env::var("UPSTREAM_PROTOCOL_VERSION") {
        upstream.protocol_version = version.trim().to_string();
    }
    if let Some(secs) = parse("UPSTREAM_CONNECT_TIMEOUT_SECS")? {
        upstream.connect_timeout_secs = secs;
    }

    if let Some(capacity) = parse("INBOUND_QUEUE_CAPACITY")? {
        config.relay.inbound_queue_capacity = capacity;
    }
    if let Some(ms) = parse("TEARDOWN_TIMEOUT_MS")? {
        config.relay.teardown_timeout_ms = ms;
    }

    let session = &mut config.session;
    if let Some(modalities) = var("SESSION_MODALITIES") {
        session.modalities = parse_modalities(&modalities);
    }
    if let Some(instructions) = var("SESSION_INSTRUCTIONS") {
        session.instructions = instructions;
    }
    if let Some(voice) = var("SESSION_VOICE") {
        session.voice = voice;
    }
    if let Some(format) = var("SESSION_INPUT_AUDIO_FORMAT") {
        session.input_audio_format = format;
    }
    if let Some(format) = var("SESSION_OUTPUT_AUDIO_FORMAT") {
        session.output_audio_format = format;
    }
    // Set but empty disables input transcription
    if let Ok(model) = std::env::var("SESSION_TRANSCRIPTION_MODEL") {
        let model = model.trim();
        session.transcription_model = (!model.is_empty()).then(|| model.to_string());
    }
    if let Some(temperature) = parse("SESSION_TEMPERATURE")? {
        session.temperature = temperature;
    }
    if let Some(raw) = var("SESSION_MAX_RESPONSE_OUTPUT_TOKENS") {
        session.max_response_output_tokens =
            parse_max_tokens("SESSION_MAX_RESPONSE_OUTPUT_TOKENS", &raw)?;
    }
    if let Some(threshold) = parse("SESSION_VAD_THRESHOLD")? {
        session.turn_detection.threshold = threshold;
    }
    if let Some(ms) = parse("SESSION_VAD_PREFIX_PADDING_MS")? {
        session.turn_detection.prefix_padding_ms = ms;
    }
    if let Some(ms) = parse("SESSION_VAD_SILENCE_DURATION_MS")? {
        session.turn_detection.silence_duration_ms = ms;
    }

    if let Some(origins) = var("CORS_ALLOWED_ORIGINS") {
        config.cors_allowed_origins = Some(origins);
    }
    if let Some(rps) = parse("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = parse("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    if let Some(max) = parse("MAX_WEBSOCKET_CONNECTIONS")? {
        config.max_websocket_connections = Some(max);
    }
    if let Some(max) = parse("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = max;
    }

    Ok(config)
}
