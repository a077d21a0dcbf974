//! # Configuration Decoder
//!
//! Reads the autoneg annotations of a Service into [`Statuses`].
//!
//! A Service is managed when any of the current or legacy configuration or
//! status annotations is present. A present annotation that fails to parse,
//! or a configuration that fails validation, rejects the whole decode.
//!
//! The legacy single-backend annotations are translated into the current
//! multi-backend schema so the rest of the controller only ever deals with
//! one shape.

use super::naming::NameTemplate;
use super::types::{
    AutonegAnnotation, AutonegConfig, AutonegNegConfig, AutonegStatus, BackendServiceMap,
    NegConfig, NegStatus, OldAutonegConfig, OldAutonegStatus, Statuses, SyncConfig,
};
use super::validation::validate_config;
use super::ConfigError;
use crate::constants::{
    AUTONEG_ANNOTATION, AUTONEG_STATUS_ANNOTATION, AUTONEG_SYNC_ANNOTATION, NEG_ANNOTATION,
    NEG_STATUS_ANNOTATION, OLD_AUTONEG_ANNOTATION, OLD_AUTONEG_STATUS_ANNOTATION,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Process-wide settings that shape decoding
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Template used when a backend service name is not given
    pub service_name_template: NameTemplate,
    /// When false, names given in annotations are ignored
    pub allow_service_name: bool,
    pub default_max_rate_per_endpoint: f64,
    pub default_max_connections_per_endpoint: i64,
    /// A status without configuration means "tear everything down"
    pub deregister_negs_on_annotation_removal: bool,
}

fn parse<T: DeserializeOwned>(
    annotations: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    annotations
        .get(key)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|source| ConfigError::Malformed {
                annotation: key,
                source,
            })
        })
        .transpose()
}

/// Decode the annotations of Service `namespace/name`.
///
/// Returns `Ok(None)` when the Service does not use autoneg.
///
/// # Errors
/// Returns [`ConfigError`] when a present annotation is malformed, the
/// desired configuration is invalid, or a legacy annotation is used on a
/// Service that does not expose exactly one NEG port.
pub fn decode(
    namespace: &str,
    name: &str,
    annotations: &BTreeMap<String, String>,
    cfg: &DecoderConfig,
) -> Result<Option<Statuses>, ConfigError> {
    let has_config = annotations.contains_key(AUTONEG_ANNOTATION);
    let has_status = annotations.contains_key(AUTONEG_STATUS_ANNOTATION);
    let has_old_config = annotations.contains_key(OLD_AUTONEG_ANNOTATION);
    let has_old_status = annotations.contains_key(OLD_AUTONEG_STATUS_ANNOTATION);
    if !(has_config || has_status || has_old_config || has_old_status) {
        return Ok(None);
    }

    let neg_config: NegConfig = parse(annotations, NEG_ANNOTATION)?.unwrap_or_default();
    let neg_status: NegStatus = parse(annotations, NEG_STATUS_ANNOTATION)?.unwrap_or_default();
    let sync_config: Option<SyncConfig> = parse(annotations, AUTONEG_SYNC_ANNOTATION)?;

    let annotation: Option<AutonegAnnotation> = parse(annotations, AUTONEG_ANNOTATION)?;
    let status: Option<AutonegStatus> = parse(annotations, AUTONEG_STATUS_ANNOTATION)?;
    let old_config: Option<OldAutonegConfig> = parse(annotations, OLD_AUTONEG_ANNOTATION)?;
    let old_status: Option<OldAutonegStatus> = parse(annotations, OLD_AUTONEG_STATUS_ANNOTATION)?;

    let mut statuses = Statuses {
        neg_config,
        neg_status,
        sync_config,
        new_config: has_config || (!has_old_config && (has_status || !has_old_status)),
        ..Default::default()
    };

    let config = if let Some(annotation) = annotation {
        Some(into_config(namespace, name, annotation, cfg)?)
    } else if let Some(old) = old_config {
        let port = legacy_port(&statuses.neg_config)?;
        let translated = translate_legacy(namespace, name, &port, &old, cfg)?;
        let translated_name = translated
            .backend_services
            .get(&port)
            .and_then(|services| services.keys().next())
            .cloned()
            .unwrap_or_default();
        statuses.old_config = OldAutonegConfig {
            name: translated_name,
            max_rate_per_endpoint: old.max_rate_per_endpoint,
        };
        Some(translated)
    } else {
        None
    };

    if let Some(status) = status {
        statuses.status = status;
    } else if let Some(old_status) = old_status {
        let port = legacy_status_port(&old_status.neg_status, &statuses.neg_config)?;
        statuses.status = AutonegStatus {
            config: translate_legacy(namespace, name, &port, &old_status.config, cfg)?,
            neg_status: old_status.neg_status,
            sync: None,
        };
    }

    statuses.config = match config {
        Some(config) => config,
        // Only a status is left: the user removed the configuration.
        None if cfg.deregister_negs_on_annotation_removal => AutonegConfig::default(),
        None => statuses.status.config.clone(),
    };

    Ok(Some(statuses))
}

/// The single exposed NEG port a legacy annotation applies to
fn legacy_port(neg_config: &NegConfig) -> Result<String, ConfigError> {
    let mut ports = neg_config.exposed_ports.keys();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(port.clone()),
        _ => Err(ConfigError::LegacyPortCount {
            count: neg_config.exposed_ports.len(),
        }),
    }
}

/// Port a legacy status was written for
///
/// Taken from the NEG it recorded, so it stays readable after the Service
/// exposes more ports. Statuses without a single recorded NEG fall back to
/// the exposed ports.
fn legacy_status_port(
    recorded: &NegStatus,
    neg_config: &NegConfig,
) -> Result<String, ConfigError> {
    let mut ports = recorded.network_endpoint_groups.keys();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(port.clone()),
        _ => legacy_port(neg_config),
    }
}

/// Legacy configs without a name default to the Service name
fn translate_legacy(
    namespace: &str,
    name: &str,
    port: &str,
    old: &OldAutonegConfig,
    cfg: &DecoderConfig,
) -> Result<AutonegConfig, ConfigError> {
    let annotation = AutonegAnnotation {
        backend_services: BTreeMap::from([(
            port.to_string(),
            vec![AutonegNegConfig {
                name: if old.name.is_empty() {
                    name.to_string()
                } else {
                    old.name.clone()
                },
                max_rate_per_endpoint: Some(old.max_rate_per_endpoint),
                ..Default::default()
            }],
        )]),
    };
    into_config(namespace, name, annotation, cfg)
}

/// Key the annotation's per-port lists by backend service name, filling in
/// names and balancing defaults, then validate.
fn into_config(
    namespace: &str,
    name: &str,
    annotation: AutonegAnnotation,
    cfg: &DecoderConfig,
) -> Result<AutonegConfig, ConfigError> {
    let mut backend_services = BackendServiceMap::new();

    for (port, entries) in annotation.backend_services {
        let services = backend_services.entry(port.clone()).or_default();
        for mut entry in entries {
            if entry.name.is_empty() || !cfg.allow_service_name {
                entry.name = cfg.service_name_template.generate(namespace, name, &port);
            }
            if entry.region.as_deref() == Some("") {
                entry.region = None;
            }
            if entry.max_rate_per_endpoint.is_none()
                && entry.max_connections_per_endpoint.is_none()
                && entry.custom_metrics.is_empty()
            {
                if cfg.default_max_rate_per_endpoint > 0.0 {
                    entry.max_rate_per_endpoint = Some(cfg.default_max_rate_per_endpoint);
                }
                if cfg.default_max_connections_per_endpoint > 0 {
                    entry.max_connections_per_endpoint =
                        Some(cfg.default_max_connections_per_endpoint);
                }
            }
            if services.contains_key(&entry.name) {
                return Err(ConfigError::DuplicateBackendService {
                    port,
                    name: entry.name,
                });
            }
            services.insert(entry.name.clone(), entry);
        }
    }

    let config = AutonegConfig { backend_services };
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SERVICE_NAME_TEMPLATE;

    fn decoder_config() -> DecoderConfig {
        DecoderConfig {
            service_name_template: NameTemplate::parse(DEFAULT_SERVICE_NAME_TEMPLATE).unwrap(),
            allow_service_name: true,
            default_max_rate_per_endpoint: 0.0,
            default_max_connections_per_endpoint: 0,
            deregister_negs_on_annotation_removal: true,
        }
    }

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_unmanaged_service() {
        let annos = annotations(&[(NEG_STATUS_ANNOTATION, "{")]);
        assert!(decode("ns", "svc", &annos, &decoder_config()).unwrap().is_none());
    }

    #[test]
    fn test_malformed_annotations_are_errors() {
        let cases = [
            vec![(AUTONEG_ANNOTATION, "{")],
            vec![(AUTONEG_ANNOTATION, "{}"), (AUTONEG_STATUS_ANNOTATION, "{")],
            vec![(AUTONEG_ANNOTATION, "{}"), (NEG_STATUS_ANNOTATION, "{")],
            vec![(AUTONEG_ANNOTATION, "{}"), (NEG_ANNOTATION, "1")],
            vec![
                (AUTONEG_ANNOTATION, "{}"),
                (OLD_AUTONEG_ANNOTATION, r#"{"max_rate_per_endpoint":"1"}"#),
            ],
            vec![(AUTONEG_ANNOTATION, "{}"), (AUTONEG_SYNC_ANNOTATION, "true")],
            vec![(OLD_AUTONEG_ANNOTATION, r#"{"name":"test","max_rate_per_endpoint":"100"}"#)],
        ];
        for case in cases {
            let result = decode("ns", "svc", &annotations(&case), &decoder_config());
            assert!(
                matches!(result, Err(ConfigError::Malformed { .. })),
                "{case:?} should fail, got {result:?}"
            );
        }
    }

    #[test]
    fn test_defaults_name_from_template() {
        let annos = annotations(&[(
            AUTONEG_ANNOTATION,
            r#"{"backend_services":{"4242":[{"max_rate_per_endpoint":4242}]}}"#,
        )]);
        let statuses = decode("namespace", "old-service", &annos, &decoder_config())
            .unwrap()
            .unwrap();
        let services = &statuses.config.backend_services["4242"];
        let cfg = &services["namespace-old-service-4242-de64ba2d"];
        assert_eq!(cfg.name, "namespace-old-service-4242-de64ba2d");
        assert_eq!(cfg.max_rate_per_endpoint, Some(4242.0));
        assert!(statuses.new_config);
    }

    #[test]
    fn test_custom_names_can_be_disabled() {
        let annos = annotations(&[(
            AUTONEG_ANNOTATION,
            r#"{"backend_services":{"80":[{"name":"custom","max_rate_per_endpoint":1}]}}"#,
        )]);
        let mut cfg = decoder_config();
        cfg.service_name_template = NameTemplate::parse("{name}-{port}").unwrap();
        cfg.allow_service_name = false;
        let statuses = decode("ns", "web", &annos, &cfg).unwrap().unwrap();
        assert!(statuses.config.backend_services["80"].contains_key("web-80"));
    }

    #[test]
    fn test_process_defaults_apply_only_when_unset() {
        let annos = annotations(&[(
            AUTONEG_ANNOTATION,
            r#"{"backend_services":{"80":[{"name":"a"},{"name":"b","max_connections_per_endpoint":7}]}}"#,
        )]);
        let mut cfg = decoder_config();
        cfg.default_max_rate_per_endpoint = 50.0;
        let statuses = decode("ns", "web", &annos, &cfg).unwrap().unwrap();
        let services = &statuses.config.backend_services["80"];
        assert_eq!(services["a"].max_rate_per_endpoint, Some(50.0));
        assert_eq!(services["a"].max_connections_per_endpoint, None);
        assert_eq!(services["b"].max_rate_per_endpoint, None);
        assert_eq!(services["b"].max_connections_per_endpoint, Some(7));
    }

    #[test]
    fn test_validation_failure_rejects_config() {
        let annos = annotations(&[(
            AUTONEG_ANNOTATION,
            r#"{"backend_services":{"80":[{"name":"a","initial_capacity":150}]}}"#,
        )]);
        assert!(matches!(
            decode("ns", "web", &annos, &decoder_config()),
            Err(ConfigError::PercentageOutOfRange { .. })
        ));
    }

    #[test]
    fn test_duplicate_backend_service_is_rejected() {
        let annos = annotations(&[(
            AUTONEG_ANNOTATION,
            r#"{"backend_services":{"80":[{"name":"a"},{"name":"a","region":"europe-west4"}]}}"#,
        )]);
        assert!(matches!(
            decode("ns", "web", &annos, &decoder_config()),
            Err(ConfigError::DuplicateBackendService { .. })
        ));
    }

    #[test]
    fn test_legacy_config_single_port() {
        let annos = annotations(&[
            (OLD_AUTONEG_ANNOTATION, r#"{"name":"test","max_rate_per_endpoint":100}"#),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{}}}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        let cfg = &statuses.config.backend_services["80"]["test"];
        assert_eq!(cfg.name, "test");
        assert_eq!(cfg.max_rate_per_endpoint, Some(100.0));
        assert!(!statuses.new_config);
        assert_eq!(statuses.old_config.name, "test");
    }

    #[test]
    fn test_legacy_config_requires_single_port() {
        let annos = annotations(&[
            (OLD_AUTONEG_ANNOTATION, r#"{"name":"test","max_rate_per_endpoint":100}"#),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{},"443":{}}}"#),
        ]);
        assert!(matches!(
            decode("ns", "svc", &annos, &decoder_config()),
            Err(ConfigError::LegacyPortCount { count: 2 })
        ));

        let no_ports = annotations(&[(
            OLD_AUTONEG_ANNOTATION,
            r#"{"name":"test","max_rate_per_endpoint":100}"#,
        )]);
        assert!(matches!(
            decode("ns", "svc", &no_ports, &decoder_config()),
            Err(ConfigError::LegacyPortCount { count: 0 })
        ));
    }

    #[test]
    fn test_legacy_status_becomes_actual() {
        let annos = annotations(&[
            (OLD_AUTONEG_ANNOTATION, r#"{"name":"test","max_rate_per_endpoint":100}"#),
            (
                OLD_AUTONEG_STATUS_ANNOTATION,
                r#"{"name":"test","max_rate_per_endpoint":50,"network_endpoint_groups":{"80":"neg"},"zones":["z1"]}"#,
            ),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{}}}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        let actual = &statuses.status.config.backend_services["80"]["test"];
        assert_eq!(actual.max_rate_per_endpoint, Some(50.0));
        assert_eq!(statuses.status.neg_status.zones, vec!["z1"]);
    }

    #[test]
    fn test_unnamed_legacy_config_uses_service_name() {
        let annos = annotations(&[
            (OLD_AUTONEG_ANNOTATION, r#"{"max_rate_per_endpoint":100}"#),
            (
                OLD_AUTONEG_STATUS_ANNOTATION,
                r#"{"name":"svc","max_rate_per_endpoint":100,"network_endpoint_groups":{"80":"neg"},"zones":["z1"]}"#,
            ),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{}}}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        let names: Vec<&String> = statuses.config.backend_services["80"].keys().collect();
        assert_eq!(names, vec!["svc"]);
        assert_eq!(statuses.old_config.name, "svc");
        // Matches what the legacy status recorded, so nothing moves
        assert_eq!(statuses.config.backend_services, statuses.status.config.backend_services);

        let mut generated = decoder_config();
        generated.allow_service_name = false;
        let statuses = decode("ns", "svc", &annos, &generated).unwrap().unwrap();
        assert!(statuses.config.backend_services["80"].contains_key("ns-svc-80-0c581f48"));
    }

    #[test]
    fn test_legacy_status_survives_new_ports() {
        let annos = annotations(&[
            (
                AUTONEG_ANNOTATION,
                r#"{"backend_services":{"80":[{"name":"http"}],"443":[{"name":"https"}]}}"#,
            ),
            (
                OLD_AUTONEG_STATUS_ANNOTATION,
                r#"{"name":"http","max_rate_per_endpoint":100,"network_endpoint_groups":{"80":"neg-80"},"zones":["z1"]}"#,
            ),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{},"443":{}}}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        assert!(statuses.status.config.backend_services["80"].contains_key("http"));
        assert!(!statuses.status.config.backend_services.contains_key("443"));
        assert_eq!(statuses.config.backend_services.len(), 2);
    }

    #[test]
    fn test_legacy_status_without_negs_needs_single_port() {
        let annos = annotations(&[
            (AUTONEG_ANNOTATION, r#"{"backend_services":{}}"#),
            (OLD_AUTONEG_STATUS_ANNOTATION, r#"{"name":"http","max_rate_per_endpoint":100}"#),
            (NEG_ANNOTATION, r#"{"exposed_ports":{"80":{},"443":{}}}"#),
        ]);
        assert!(matches!(
            decode("ns", "svc", &annos, &decoder_config()),
            Err(ConfigError::LegacyPortCount { count: 2 })
        ));
    }

    #[test]
    fn test_new_config_takes_precedence_over_legacy() {
        let annos = annotations(&[
            (AUTONEG_ANNOTATION, r#"{"backend_services":{"80":[{"name":"new"}]}}"#),
            (OLD_AUTONEG_ANNOTATION, r#"{"name":"old","max_rate_per_endpoint":100}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        assert!(statuses.config.backend_services["80"].contains_key("new"));
        assert!(statuses.new_config);
    }

    #[test]
    fn test_status_only_deregisters() {
        let status = r#"{"backend_services":{"80":{"web":{"name":"web","max_rate_per_endpoint":1}}},"network_endpoint_groups":{"80":"neg"},"zones":["z1"]}"#;
        let annos = annotations(&[(AUTONEG_STATUS_ANNOTATION, status)]);

        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        assert!(statuses.config.backend_services.is_empty());
        assert!(statuses.status.config.backend_services.contains_key("80"));

        let mut keep = decoder_config();
        keep.deregister_negs_on_annotation_removal = false;
        let statuses = decode("ns", "svc", &annos, &keep).unwrap().unwrap();
        assert_eq!(statuses.config, statuses.status.config);
    }

    #[test]
    fn test_sync_config_is_decoded() {
        let annos = annotations(&[
            (AUTONEG_ANNOTATION, r#"{"backend_services":{}}"#),
            (AUTONEG_SYNC_ANNOTATION, r#"{"capacity_scaler":true}"#),
        ]);
        let statuses = decode("ns", "svc", &annos, &decoder_config()).unwrap().unwrap();
        assert_eq!(statuses.sync_config, Some(SyncConfig { capacity_scaler: true }));
    }
}
