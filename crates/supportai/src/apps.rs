//! App registry operations used by the `supportai app` commands.

use anyhow::{bail, Result};

use supportai_core::guard::parse_domains;
use supportai_core::models::{now_ms, App, AppPatch, CopyText, Theme, DEFAULT_BORDER_COLOR};
use supportai_core::store::AppStore;

const KEY_ATTEMPTS: usize = 3;

/// A fresh public key: `app_` followed by 24 lowercase hex characters.
pub fn generate_app_key() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("app_{}", &hex[..24])
}

/// Register a new app with default theme and copy.
///
/// The key is regenerated on collision, up to three attempts.
pub async fn create_app(
    store: &dyn AppStore,
    owner_id: &str,
    name: &str,
    domains: &[String],
) -> Result<App> {
    let name = name.trim();
    if name.is_empty() {
        bail!("app name must not be empty");
    }

    for _ in 0..KEY_ATTEMPTS {
        let app_key = generate_app_key();
        if store.find_app(&app_key).await?.is_some() {
            tracing::warn!(%app_key, "app key collision; regenerating");
            continue;
        }
        let now = now_ms();
        let app = App {
            app_key,
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            allowed_domains: parse_domains(domains),
            theme: Theme::default(),
            copy: CopyText::default(),
            enable_border: false,
            border_color: DEFAULT_BORDER_COLOR.to_string(),
            created_at: now,
            updated_at: now,
        };
        store.create_app(&app).await?;
        tracing::info!(app_key = %app.app_key, owner_id, "app created");
        return Ok(app);
    }

    bail!("could not generate a unique app key after {} attempts", KEY_ATTEMPTS)
}

/// Replace an app's allowlist with normalized `domains`.
pub async fn set_domains(store: &dyn AppStore, app_key: &str, domains: &[String]) -> Result<App> {
    let patch = AppPatch {
        allowed_domains: Some(domains.to_vec()),
        ..Default::default()
    };
    update_app(store, app_key, &patch).await
}

/// Apply a settings patch, failing if the app does not exist.
pub async fn update_app(store: &dyn AppStore, app_key: &str, patch: &AppPatch) -> Result<App> {
    match store.update_app(app_key, patch).await? {
        Some(app) => Ok(app),
        None => bail!("no app with key '{}'", app_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use supportai_core::store::memory::InMemoryStore;

    #[test]
    fn test_app_key_format() {
        let key = generate_app_key();
        assert!(key.starts_with("app_"));
        let hex = &key[4..];
        assert_eq!(hex.len(), 24);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_app_key(), key);
    }

    #[tokio::test]
    async fn test_create_app_normalizes_domains() {
        let store = InMemoryStore::new();
        let app = create_app(
            &store,
            "owner",
            "  Docs  ",
            &["https://Docs.Example.com/help, localhost:3000".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(app.name, "Docs");
        assert_eq!(app.allowed_domains, vec!["docs.example.com", "localhost"]);
        assert_eq!(app.theme, Theme::default());
        assert!(store.find_app(&app.app_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_domains_missing_app() {
        let store = InMemoryStore::new();
        assert!(set_domains(&store, "app_missing", &["a.com".to_string()])
            .await
            .is_err());
        assert!(create_app(&store, "o", " ", &[]).await.is_err());
    }
}
