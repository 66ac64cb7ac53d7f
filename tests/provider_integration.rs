//! Configuration-driven wiring: load a TOML file, select the provider, and
//! run a build through the stores the context hands out.

use revision_timeline::config::load_config;
use revision_timeline::error::ConfigurationError;
use revision_timeline::models::JobStatus;
use revision_timeline::provider::{CloudProvider, ProviderContext};
use revision_timeline::timeline::TimelineBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("rtl.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn local_config(dir: &Path) -> PathBuf {
    write_config(
        dir,
        &format!(
            r#"
[cloud]
provider = "local"

[local]
db_path = "{}"
secret_prefix = "RTL_IT_SECRET_"

[llm]
provider = "openai"
models = ["gpt-4o-mini"]
default_model = "gpt-4o-mini"

[retry]
max_attempts = 2
base_delay_ms = 10
max_delay_ms = 20
"#,
            dir.join("db").join("jobs.sqlite").display()
        ),
    )
}

#[tokio::test]
async fn test_local_provider_end_to_end_without_revisions() {
    let tmp = TempDir::new().unwrap();
    let cfg = load_config(&local_config(tmp.path())).unwrap();
    let ctx = ProviderContext::new(&cfg).unwrap();
    assert_eq!(ctx.provider(), CloudProvider::Local);

    let builder = TimelineBuilder::from_context(&ctx).await.unwrap();
    let job = builder.build("doc-1", Some("u-1"), Vec::new()).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // The builder and the context share one job store instance.
    let store = ctx.job_store().await.unwrap();
    assert!(Arc::ptr_eq(&store, builder.job_store()));

    let stored = store.get_job(&job.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.timeline.unwrap().is_empty());
    assert!(tmp.path().join("db").join("jobs.sqlite").exists());
}

#[tokio::test]
async fn test_local_secret_store_reads_environment() {
    let tmp = TempDir::new().unwrap();
    let cfg = load_config(&local_config(tmp.path())).unwrap();
    let ctx = ProviderContext::new(&cfg).unwrap();

    std::env::set_var("RTL_IT_SECRET_OPENAI_API_KEY", "sk-test");
    let secrets = ctx.secrets().await.unwrap();
    let secret = secrets.fetch_secret("openai-api-key").await.unwrap();
    assert_eq!(secret.expose(), "sk-test");
    std::env::remove_var("RTL_IT_SECRET_OPENAI_API_KEY");
}

#[test]
fn test_invalid_config_is_rejected_on_load() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        "[llm]\nmodels = [\"a\"]\ndefault_model = \"b\"\n",
    );
    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("default_model"), "{err:#}");
}

#[test]
fn test_unsupported_provider_fails_at_selection() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(tmp.path(), "[cloud]\nprovider = \"gcp\"\n");
    // Validation catches it at load time.
    assert!(load_config(&path).is_err());

    let cfg: revision_timeline::config::Config =
        toml::from_str("[cloud]\nprovider = \"gcp\"\n").unwrap();
    assert!(matches!(
        ProviderContext::new(&cfg),
        Err(ConfigurationError::UnsupportedProvider(_))
    ));
}
