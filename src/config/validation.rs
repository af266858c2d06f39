use url::Url;

use super::{ConfigError, ServerConfig};

const KNOWN_MODALITIES: &[&str] = &["text", "audio"];

/// Reject configurations the server cannot run with. Runs before binding, so
/// a bad deployment never accepts a connection.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_upstream(config)?;
    validate_relay(config)?;
    validate_session(config)?;
    validate_security(config)?;
    Ok(())
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

fn validate_upstream(config: &ServerConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;

    match &upstream.api_key {
        Some(key) if !key.trim().is_empty() => {}
        _ => return Err(ConfigError::Missing("OPENAI_API_KEY")),
    }

    let url = Url::parse(&upstream.url)
        .map_err(|e| invalid("UPSTREAM_URL", format!("'{}': {e}", upstream.url)))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(
            "UPSTREAM_URL",
            format!("scheme must be ws or wss, got '{}'", url.scheme()),
        ));
    }

    if upstream.connect_timeout_secs == 0 {
        return Err(invalid("UPSTREAM_CONNECT_TIMEOUT_SECS", "must be positive"));
    }

    Ok(())
}

fn validate_relay(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.relay.inbound_queue_capacity == 0 {
        return Err(invalid("INBOUND_QUEUE_CAPACITY", "must be positive"));
    }
    if config.relay.teardown_timeout_ms == 0 {
        return Err(invalid("TEARDOWN_TIMEOUT_MS", "must be positive"));
    }
    Ok(())
}

fn validate_session(config: &ServerConfig) -> Result<(), ConfigError> {
    let session = &config.session;

    if session.modalities.is_empty() {
        return Err(invalid("SESSION_MODALITIES", "at least one modality is required"));
    }
    if let Some(unknown) = session
        .modalities
        .iter()
        .find(|m| !KNOWN_MODALITIES.contains(&m.as_str()))
    {
        return Err(invalid(
            "SESSION_MODALITIES",
            format!("unknown modality '{unknown}'"),
        ));
    }
    if session.voice.trim().is_empty() {
        return Err(invalid("SESSION_VOICE", "must not be empty"));
    }
    if !(0.0..=2.0).contains(&session.temperature) {
        return Err(invalid(
            "SESSION_TEMPERATURE",
            format!("{} is outside 0.0..=2.0", session.temperature),
        ));
    }
    if !(0.0..=1.0).contains(&session.turn_detection.threshold) {
        return Err(invalid(
            "SESSION_VAD_THRESHOLD",
            format!("{} is outside 0.0..=1.0", session.turn_detection.threshold),
        ));
    }
    if session.max_response_output_tokens == Some(0) {
        return Err(invalid(
            "SESSION_MAX_RESPONSE_OUTPUT_TOKENS",
            "must be positive or \"inf\"",
        ));
    }

    Ok(())
}

fn validate_security(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.rate_limit_requests_per_second == 0 {
        return Err(invalid("RATE_LIMIT_REQUESTS_PER_SECOND", "must be positive"));
    }
    if config.rate_limit_burst_size == 0 {
        return Err(invalid("RATE_LIMIT_BURST_SIZE", "must be positive"));
    }
    if config.max_connections_per_ip == 0 {
        return Err(invalid("MAX_CONNECTIONS_PER_IP", "must be positive"));
    }
    if config.max_websocket_connections == Some(0) {
        return Err(invalid("MAX_WEBSOCKET_CONNECTIONS", "must be positive"));
    }
    Ok(())
}
