use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use academy_core::config::{AppConfig, LogFormat, DEFAULT_CONFIG_FILE};
use toml::Value;

use crate::commands::runtime::load_config;
use crate::commands::CommandResult;

/// Effective configuration with the source of every value. Secrets are
/// never printed.
pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let notifications = &config.notifications;
    vec![
        Field {
            key_path: "database.url",
            value: config.database.url.clone(),
            env_keys: &["ACADEMY_DATABASE_URL"],
        },
        Field {
            key_path: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["ACADEMY_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key_path: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["ACADEMY_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key_path: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["ACADEMY_LOGGING_LEVEL", "ACADEMY_LOG_LEVEL"],
        },
        Field {
            key_path: "logging.format",
            value: log_format_name(config.logging.format).to_string(),
            env_keys: &["ACADEMY_LOGGING_FORMAT", "ACADEMY_LOG_FORMAT"],
        },
        Field {
            key_path: "notifications.enabled",
            value: notifications.enabled.to_string(),
            env_keys: &["ACADEMY_NOTIFICATIONS_ENABLED"],
        },
        Field {
            key_path: "notifications.webhook_url",
            value: notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["ACADEMY_NOTIFICATIONS_WEBHOOK_URL"],
        },
        Field {
            key_path: "notifications.api_token",
            value: if notifications.api_token.is_some() { "<redacted>" } else { "<unset>" }
                .to_string(),
            env_keys: &["ACADEMY_NOTIFICATIONS_API_TOKEN"],
        },
        Field {
            key_path: "notifications.timeout_secs",
            value: notifications.timeout_secs.to_string(),
            env_keys: &["ACADEMY_NOTIFICATIONS_TIMEOUT_SECS"],
        },
    ]
}

fn log_format_name(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc = "[notifications]\nenabled = true\n".parse::<Value>().expect("valid toml");
        assert!(contains_path(&doc, "notifications.enabled"));
        assert!(!contains_path(&doc, "notifications.webhook_url"));
        assert!(!contains_path(&doc, "database.url"));
    }

    #[test]
    fn file_attribution_names_the_file() {
        let doc = "[database]\nurl = \"sqlite://academy.db\"\n".parse::<Value>().expect("valid toml");
        let source = field_source(
            "database.url",
            &["ACADEMY_TEST_UNSET_DATABASE_URL"],
            Some(&doc),
            Some(Path::new("config/academy.toml")),
        );
        assert_eq!(source, "file (config/academy.toml)");

        let fallback = field_source("logging.level", &[], Some(&doc), None);
        assert_eq!(fallback, "default");
    }
}
