//! Runtime configuration (spec.md §6): CLI flags mirror `CHANNEL_`-prefixed
//! environment variables one-to-one, CLI taking precedence. No external CLI
//! parser crate — the flag set is small and fixed, so a hand-rolled scanner
//! (grounded on the teacher's own env-var-driven `Config::load` in
//! `config/mod.rs`) is enough.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorMode {
    Default,
    Codex,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub mode: String,
    pub ack_policy: crate::model::AckPolicy,
    pub poll_interval_s: u64,
    pub allowed_chat_ids: Vec<String>,
    pub live_mode: bool,
    pub orchestrator_mode: OrchestratorMode,
    pub codex_timeout_s: f64,
    pub notify_on_orchestrator_error: bool,
    pub codex_session_max: usize,
    pub codex_session_idle_ttl_s: u64,
    pub cursor_state_path: Option<String>,
    pub strict_cursor_state_io: bool,
    pub once: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("missing value for flag: {0}")]
    MissingValue(String),
    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },
    #[error("missing required token: set --token or CHANNEL_TOKEN")]
    MissingToken,
    #[error("--live-mode true requires a non-empty --allowed-chat-ids")]
    LiveModeRequiresAllowlist,
}

const KNOWN_FLAGS: &[&str] = &[
    "token",
    "mode",
    "ack-policy",
    "poll-interval-s",
    "allowed-chat-ids",
    "live-mode",
    "orchestrator-mode",
    "codex-timeout-s",
    "notify-on-orchestrator-error",
    "codex-session-max",
    "codex-session-idle-ttl-s",
    "cursor-state-path",
    "strict-cursor-state-io",
    "once",
];

impl Config {
    pub fn from_args_and_env(
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let flags = scan_flags(args)?;
        let get = |name: &str| -> Option<String> {
            flags
                .get(name)
                .cloned()
                .or_else(|| env.get(&env_key(name)).cloned())
        };

        let token = get("token").ok_or(ConfigError::MissingToken)?;
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let mode = get("mode").unwrap_or_else(|| "poll".to_string());

        let ack_policy = match get("ack-policy") {
            Some(raw) => crate::model::AckPolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                flag: "ack-policy".to_string(),
                value: raw.clone(),
            })?,
            None => crate::model::AckPolicy::Always,
        };

        let poll_interval_s = parse_or_default("poll-interval-s", &get("poll-interval-s"), 5)?;

        let allowed_chat_ids = get("allowed-chat-ids")
            .map(|csv| {
                csv.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let live_mode = parse_bool_or_default("live-mode", &get("live-mode"), false)?;

        let orchestrator_mode = match get("orchestrator-mode").as_deref() {
            None | Some("default") => OrchestratorMode::Default,
            Some("codex") => OrchestratorMode::Codex,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    flag: "orchestrator-mode".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let codex_timeout_s = parse_or_default("codex-timeout-s", &get("codex-timeout-s"), 30.0)?;
        let notify_on_orchestrator_error =
            parse_bool_or_default("notify-on-orchestrator-error", &get("notify-on-orchestrator-error"), false)?;
        let codex_session_max = parse_or_default("codex-session-max", &get("codex-session-max"), 50)?;
        let codex_session_idle_ttl_s =
            parse_or_default("codex-session-idle-ttl-s", &get("codex-session-idle-ttl-s"), 900)?;

        let cursor_state_path = get("cursor-state-path").filter(|p| !p.is_empty());
        let strict_cursor_state_io =
            parse_bool_or_default("strict-cursor-state-io", &get("strict-cursor-state-io"), false)?;
        let once = parse_bool_or_default("once", &get("once"), false)?;

        if live_mode && allowed_chat_ids.is_empty() {
            return Err(ConfigError::LiveModeRequiresAllowlist);
        }

        Ok(Config {
            token,
            mode,
            ack_policy,
            poll_interval_s,
            allowed_chat_ids,
            live_mode,
            orchestrator_mode,
            codex_timeout_s,
            notify_on_orchestrator_error,
            codex_session_max,
            codex_session_idle_ttl_s,
            cursor_state_path,
            strict_cursor_state_io,
            once,
        })
    }
}

fn env_key(flag: &str) -> String {
    format!("CHANNEL_{}", flag.to_uppercase().replace('-', "_"))
}

/// Scans `--flag value`, `--flag=value`, and bare boolean `--flag` forms.
fn scan_flags(args: &[String]) -> Result<HashMap<String, String>, ConfigError> {
    let mut flags = HashMap::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            continue;
        };
        let (name, inline_value) = match stripped.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (stripped, None),
        };

        if !KNOWN_FLAGS.contains(&name) {
            return Err(ConfigError::UnknownFlag(format!("--{name}")));
        }

        let value = if let Some(value) = inline_value {
            value
        } else if let Some(next) = iter.peek() {
            if next.starts_with("--") {
                "true".to_string()
            } else {
                iter.next().unwrap().clone()
            }
        } else {
            "true".to_string()
        };

        flags.insert(name.to_string(), value);
    }
    Ok(flags)
}

fn parse_or_default<T>(flag: &str, raw: &Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: value.clone(),
        }),
    }
}

fn parse_bool_or_default(flag: &str, raw: &Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref() {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn minimal_valid_config() {
        let env = HashMap::new();
        let cfg = Config::from_args_and_env(&args(&["--token", "abc"]), &env).unwrap();
        assert_eq!(cfg.token, "abc");
        assert_eq!(cfg.mode, "poll");
        assert_eq!(cfg.ack_policy, crate::model::AckPolicy::Always);
        assert_eq!(cfg.poll_interval_s, 5);
        assert!(!cfg.live_mode);
    }

    #[test]
    fn cli_overrides_env() {
        let mut env = HashMap::new();
        env.insert("CHANNEL_TOKEN".to_string(), "from-env".to_string());
        let cfg = Config::from_args_and_env(&args(&["--token", "from-cli"]), &env).unwrap();
        assert_eq!(cfg.token, "from-cli");
    }

    #[test]
    fn env_used_when_cli_absent() {
        let mut env = HashMap::new();
        env.insert("CHANNEL_TOKEN".to_string(), "from-env".to_string());
        env.insert("CHANNEL_ONCE".to_string(), "true".to_string());
        let cfg = Config::from_args_and_env(&args(&[]), &env).unwrap();
        assert_eq!(cfg.token, "from-env");
        assert!(cfg.once);
    }

    #[test]
    fn missing_token_is_an_error() {
        let env = HashMap::new();
        let err = Config::from_args_and_env(&args(&[]), &env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let env = HashMap::new();
        let err = Config::from_args_and_env(&args(&["--token", "x", "--bogus", "y"]), &env).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFlag(_)));
    }

    #[test]
    fn live_mode_requires_allowlist() {
        let env = HashMap::new();
        let err = Config::from_args_and_env(&args(&["--token", "x", "--live-mode", "true"]), &env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::LiveModeRequiresAllowlist));
    }

    #[test]
    fn allowed_chat_ids_parses_csv() {
        let env = HashMap::new();
        let cfg = Config::from_args_and_env(
            &args(&["--token", "x", "--allowed-chat-ids", "42, 777"]),
            &env,
        )
        .unwrap();
        assert_eq!(cfg.allowed_chat_ids, vec!["42".to_string(), "777".to_string()]);
    }

    #[test]
    fn bare_boolean_flag_defaults_to_true() {
        let env = HashMap::new();
        let cfg = Config::from_args_and_env(&args(&["--token", "x", "--once"]), &env).unwrap();
        assert!(cfg.once);
    }
}
