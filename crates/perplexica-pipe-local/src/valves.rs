use perplexica_pipe_core::{Error, Result, Valves};
use std::path::Path;

pub const ENV_PREFIX: &str = "PERPLEXICA_PIPE_";

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    let Some(v) = env(key) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::InvalidConfig(format!("{key}: expected a boolean, got {v:?}"))),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    env(key)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|e| Error::InvalidConfig(format!("{key}: {e}")))
        })
        .transpose()
}

fn key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

/// Overlay `PERPLEXICA_PIPE_*` env vars onto `base`. Blank values are ignored.
pub fn overlay_env(mut v: Valves) -> Result<Valves> {
    if let Some(b) = env_bool(&key("ENABLE"))? {
        v.enable_perplexica = b;
    }
    let strings: [(&str, &mut String); 8] = [
        ("API_URL", &mut v.api_url),
        ("CHAT_PROVIDER", &mut v.chat_provider),
        ("CHAT_MODEL", &mut v.chat_model),
        ("EMBEDDING_PROVIDER", &mut v.embedding_provider),
        ("EMBEDDING_MODEL", &mut v.embedding_model),
        ("FOCUS_MODE", &mut v.focus_mode),
        ("OPTIMIZATION_MODE", &mut v.optimization_mode),
        ("TASK_MODEL", &mut v.task_model),
    ];
    for (name, slot) in strings {
        if let Some(s) = env(&key(name)) {
            *slot = s;
        }
    }
    if let Some(s) = env(&key("CUSTOM_OPENAI_BASE_URL")) {
        v.custom_openai_base_url = Some(s);
    }
    if let Some(s) = env(&key("CUSTOM_OPENAI_KEY")) {
        v.custom_openai_key = Some(s);
    }
    if let Some(ms) = env_u64(&key("TIMEOUT_MS"))? {
        v.timeout_ms = Some(ms);
    }
    Ok(v)
}

/// Defaults, then env, then validation.
pub fn from_env() -> Result<Valves> {
    let v = overlay_env(Valves::default())?;
    v.validate()?;
    Ok(v)
}

/// A JSON valves file (missing fields take defaults), then env, then validation.
pub fn from_file_and_env(path: &Path) -> Result<Valves> {
    let txt = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
    let base: Valves = serde_json::from_str(&txt)
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
    let v = overlay_env(base)?;
    v.validate()?;
    Ok(v)
}

/// Load `KEY=VALUE` lines into the process env without overriding existing vars.
///
/// Blank lines and `#` comments are skipped. Values are never logged.
pub fn load_env_file(path: &Path) -> Result<usize> {
    let txt = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
    let mut applied = 0;
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
            applied += 1;
        }
    }
    tracing::debug!(path = %path.display(), applied, "loaded env file");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: String,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self {
                k: k.to_string(),
                prev,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(&self.k, v);
            } else {
                std::env::remove_var(&self.k);
            }
        }
    }

    #[test]
    fn env_overrides_defaults() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g1 = EnvGuard::set("PERPLEXICA_PIPE_FOCUS_MODE", "academicSearch");
        let _g2 = EnvGuard::set("PERPLEXICA_PIPE_ENABLE", "false");
        let _g3 = EnvGuard::set("PERPLEXICA_PIPE_TIMEOUT_MS", "1500");
        let v = from_env().unwrap();
        assert_eq!(v.focus_mode, "academicSearch");
        assert!(!v.enable_perplexica);
        assert_eq!(v.timeout_ms, Some(1500));
        assert_eq!(v.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn blank_env_values_are_treated_as_unset() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g1 = EnvGuard::set("PERPLEXICA_PIPE_CUSTOM_OPENAI_KEY", "   ");
        let _g2 = EnvGuard::set("PERPLEXICA_PIPE_API_URL", "");
        let v = from_env().unwrap();
        assert!(v.custom_openai_key.is_none());
        assert_eq!(v.api_url, Valves::default().api_url);
    }

    #[test]
    fn bad_bool_is_a_config_error() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g = EnvGuard::set("PERPLEXICA_PIPE_ENABLE", "maybe");
        assert!(matches!(from_env(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn valves_file_then_env() {
        let _l = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("valves.json");
        std::fs::write(
            &p,
            r#"{"api_url":"http://search.internal:3001/api/search","chat_model":"llama3"}"#,
        )
        .unwrap();
        let _g = EnvGuard::set("PERPLEXICA_PIPE_CHAT_MODEL", "qwen2.5");
        let v = from_file_and_env(&p).unwrap();
        assert_eq!(v.api_url, "http://search.internal:3001/api/search");
        assert_eq!(v.chat_model, "qwen2.5");
    }

    #[test]
    fn env_file_does_not_override_process_env() {
        let _l = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join(".env");
        std::fs::write(
            &p,
            "# comment\n\nPERPLEXICA_PIPE_TEST_A=from_file\nPERPLEXICA_PIPE_TEST_B=\"quoted\"\nnot a pair\n",
        )
        .unwrap();
        let _g = EnvGuard::set("PERPLEXICA_PIPE_TEST_A", "from_process");
        let _cleanup = EnvGuard::set("PERPLEXICA_PIPE_TEST_B", "");
        std::env::remove_var("PERPLEXICA_PIPE_TEST_B");
        let applied = load_env_file(&p).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(std::env::var("PERPLEXICA_PIPE_TEST_A").unwrap(), "from_process");
        assert_eq!(std::env::var("PERPLEXICA_PIPE_TEST_B").unwrap(), "quoted");
    }
}
