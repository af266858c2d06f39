use std::path::PathBuf;

use zeroize::Zeroizing;

use super::env::{load_from_env, parse_max_tokens};
use super::yaml::{MaxTokensYaml, SessionYaml, YamlConfig};
use super::{ConfigError, ServerConfig, TlsConfig};

/// Environment (with defaults) as the base, YAML values on top.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            if tls.enabled == Some(false) {
                config.tls = None;
            } else {
                match (tls.cert_path, tls.key_path) {
                    (Some(cert), Some(key)) => {
                        config.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    }
                    (None, None) => {}
                    _ => {
                        return Err(ConfigError::Invalid(
                            "server.tls requires both cert_path and key_path".to_string(),
                        ));
                    }
                }
            }
        }
    }

    if let Some(upstream) = yaml.upstream {
        if let Some(url) = upstream.url {
            config.upstream.url = url;
        }
        if let Some(key) = upstream.api_key {
            config.upstream.api_key = Some(Zeroizing::new(key));
        }
        if let Some(version) = upstream.protocol_version {
            config.upstream.protocol_version = version;
        }
        if let Some(secs) = upstream.connect_timeout_secs {
            config.upstream.connect_timeout_secs = secs;
        }
    }

    if let Some(relay) = yaml.relay {
        if let Some(capacity) = relay.inbound_queue_capacity {
            config.relay.inbound_queue_capacity = capacity;
        }
        if let Some(ms) = relay.teardown_timeout_ms {
            config.relay.teardown_timeout_ms = ms;
        }
    }

    if let Some(session) = yaml.session {
        merge_session(&mut config, session)?;
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(max) = security.max_connections_per_ip {
            config.max_connections_per_ip = max;
        }
    }

    Ok(config)
}

fn merge_session(config: &mut ServerConfig, yaml: SessionYaml) -> Result<(), ConfigError> {
    let session = &mut config.session;

    if let Some(modalities) = yaml.modalities {
        session.modalities = modalities
            .into_iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
    }
    if let Some(instructions) = yaml.instructions {
        session.instructions = instructions;
    }
    if let Some(voice) = yaml.voice {
        session.voice = voice;
    }
    if let Some(format) = yaml.input_audio_format {
        session.input_audio_format = format;
    }
    if let Some(format) = yaml.output_audio_format {
        session.output_audio_format = format;
    }
    if let Some(model) = yaml.transcription_model {
        session.transcription_model = (!model.trim().is_empty()).then_some(model);
    }
    if let Some(temperature) = yaml.temperature {
        session.temperature = temperature;
    }
    if let Some(max_tokens) = yaml.max_response_output_tokens {
        session.max_response_output_tokens = match max_tokens {
            MaxTokensYaml::Limit(limit) => Some(limit),
            MaxTokensYaml::Text(raw) => {
                parse_max_tokens("session.max_response_output_tokens", raw.trim())?
            }
        };
    }
    if let Some(turn_detection) = yaml.turn_detection {
        let target = &mut session.turn_detection;
        if let Some(threshold) = turn_detection.threshold {
            target.threshold = threshold;
        }
        if let Some(ms) = turn_detection.prefix_padding_ms {
            target.prefix_padding_ms = ms;
        }
        if let Some(ms) = turn_detection.silence_duration_ms {
            target.silence_duration_ms = ms;
        }
    }

    Ok(())
}
