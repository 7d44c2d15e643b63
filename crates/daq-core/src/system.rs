use std::sync::OnceLock;

static AGENT_ID: OnceLock<String> = OnceLock::new();

/// Default agent identity: the host name, resolved once.
pub fn agent_id() -> &'static str {
    AGENT_ID.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "unknown-agent".to_string())
    })
}
