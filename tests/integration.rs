use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn meet_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_meet"))
}

/// Workspace with a cache root, a config with every hosted collaborator
/// disabled, and two meeting files.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    fs::write(
        root.join("agenda.md"),
        "# Q3 Planning\n\nBudget review and hiring plan.\n\nRoadmap for the mobile launch.",
    )
    .unwrap();
    fs::write(
        root.join("notes.txt"),
        "Decision: freeze hiring until October.\n\nAction: Dana drafts the budget memo.",
    )
    .unwrap();

    let config_path = root.join("local.toml");
    fs::write(&config_path, local_config(root)).unwrap();
    (tmp, config_path)
}

fn local_config(root: &Path) -> String {
    format!(
        r#"[cache]
root = "{}/cache"

[ocr]
engine = "disabled"

[transcription]
provider = "disabled"

[generation]
provider = "disabled"
"#,
        root.display()
    )
}

fn run_meet(dir: &Path, config: Option<&Path>, args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(meet_binary());
    cmd.current_dir(dir)
        .env_remove("OPENAI_API_KEY")
        .env_remove("MEETEASE_CACHE_ROOT")
        .env_remove("MEETEASE_API_BASE_URL")
        .env_remove("RUST_LOG");
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    cmd.args(args).envs(env.iter().copied());
    cmd.output()
        .unwrap_or_else(|e| panic!("failed to run meet binary: {e}"))
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn ingest(dir: &Path, config: &Path, files: &[&str]) -> (Output, String) {
    let mut args = vec!["ingest", "--title", "Q3 Planning", "--date", "2024-07-01"];
    args.extend_from_slice(files);
    let output = run_meet(dir, Some(config), &args, &[]);
    assert!(output.status.success(), "ingest failed: {}", stderr(&output));
    let session = stdout(&output).lines().last().unwrap().trim().to_string();
    (output, session)
}

#[test]
fn test_session_id_is_stable_and_writes_nothing() {
    let (tmp, _config) = setup_test_env();
    let args = [
        "session-id",
        "--title",
        "Q3 Planning!!",
        "--date",
        "2024-07-01",
        "agenda.md",
    ];
    let first = run_meet(tmp.path(), None, &args, &[]);
    let second = run_meet(tmp.path(), None, &args, &[]);
    assert!(first.status.success(), "{}", stderr(&first));

    let id = stdout(&first).trim().to_string();
    assert_eq!(id, stdout(&second).trim());
    assert!(id.starts_with("q3-planning-2024-07-01-"), "{id}");
    assert_eq!(id.len(), "q3-planning-2024-07-01-".len() + 8);
    assert!(!tmp.path().join("cache").exists());
    assert!(!tmp.path().join(".meetease-cache").exists());
}

#[test]
fn test_ingest_then_reuse_from_cache() {
    let (tmp, config) = setup_test_env();

    let (first, session) = ingest(tmp.path(), &config, &["agenda.md", "notes.txt"]);
    let out = stdout(&first);
    assert!(out.contains("agenda.md → document document-"), "{out}");
    assert_eq!(out.matches("computed").count(), 2, "{out}");
    assert!(tmp.path().join("cache").join(&session).join("session.json").exists());

    let (second, again) = ingest(tmp.path(), &config, &["agenda.md", "notes.txt"]);
    assert_eq!(session, again);
    assert_eq!(stdout(&second).matches("cached").count(), 2);
}

#[test]
fn test_force_recomputes() {
    let (tmp, config) = setup_test_env();
    ingest(tmp.path(), &config, &["notes.txt"]);

    let output = run_meet(
        tmp.path(),
        Some(&config),
        &[
            "ingest", "--title", "Q3 Planning", "--date", "2024-07-01", "--force", "notes.txt",
        ],
        &[],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("computed"));
}

#[test]
fn test_add_to_existing_session() {
    let (tmp, config) = setup_test_env();
    let (_, session) = ingest(tmp.path(), &config, &["agenda.md"]);

    let output = run_meet(
        tmp.path(),
        Some(&config),
        &["ingest", "--session", &session, "notes.txt"],
        &[],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).lines().last().unwrap().trim(), session);

    let show = run_meet(tmp.path(), Some(&config), &["show", &session], &[]);
    let out = stdout(&show);
    assert!(show.status.success(), "{}", stderr(&show));
    assert!(out.contains("Q3 Planning"), "{out}");
    assert!(out.contains("agenda.md"), "{out}");
    assert!(out.contains("notes.txt"), "{out}");
}

#[test]
fn test_keyword_search_and_index() {
    let (tmp, config) = setup_test_env();
    let (_, session) = ingest(tmp.path(), &config, &["agenda.md", "notes.txt"]);

    let index = run_meet(tmp.path(), Some(&config), &["index", &session], &[]);
    assert!(index.status.success(), "{}", stderr(&index));
    assert!(stdout(&index).contains("keyword only"));

    let search = run_meet(
        tmp.path(),
        Some(&config),
        &["search", &session, "hiring freeze", "--json"],
        &[],
    );
    assert!(search.status.success(), "{}", stderr(&search));
    let hits: serde_json::Value = serde_json::from_slice(&search.stdout).unwrap();
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["source"], "notes.txt");

    let none = run_meet(tmp.path(), Some(&config), &["search", &session, "zebra"], &[]);
    assert!(stdout(&none).contains("No results."));
}

#[test]
fn test_sessions_lists_cache() {
    let (tmp, config) = setup_test_env();
    let empty = run_meet(tmp.path(), Some(&config), &["sessions"], &[]);
    assert!(empty.status.success(), "{}", stderr(&empty));
    assert!(stdout(&empty).contains("Sessions:    0"));

    let (_, session) = ingest(tmp.path(), &config, &["agenda.md"]);
    let listed = run_meet(tmp.path(), Some(&config), &["sessions"], &[]);
    assert!(stdout(&listed).contains(&session));
}

#[test]
fn test_unknown_session_is_reported() {
    let (tmp, config) = setup_test_env();
    let output = run_meet(
        tmp.path(),
        Some(&config),
        &["index", "nothing-2024-01-01-00000000"],
        &[],
    );
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("❌"), "{err}");
    assert!(err.contains("unknown session"), "{err}");
    assert!(err.contains("💡"), "{err}");
}

#[test]
fn test_missing_api_key_fails_before_any_work() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
    let output = run_meet(
        tmp.path(),
        None,
        &["ingest", "--title", "Sync", "--date", "2024-07-01", "notes.txt"],
        &[("MEETEASE_CACHE_ROOT", "cache")],
    );
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("OPENAI_API_KEY"), "{err}");
    assert!(err.contains("config file or environment"), "{err}");
    assert!(!tmp.path().join("cache").exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nmax_tokens = 0\n").unwrap();
    let output = run_meet(tmp.path(), Some(&config), &["sessions"], &[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("chunking.max_tokens"));
}

#[test]
fn test_doctor_passes_for_local_config() {
    let (tmp, config) = setup_test_env();
    let output = run_meet(tmp.path(), Some(&config), &["doctor"], &[]);
    let out = stdout(&output);
    assert!(output.status.success(), "{out}");
    assert!(out.contains("✅ Cache root is writable"), "{out}");
    assert!(out.contains("All good"), "{out}");
}

#[test]
fn test_doctor_hides_key_and_reports_missing_ocr() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("meetease.toml");
    fs::write(
        &config,
        "[ocr]\ncommand = \"definitely-not-a-real-ocr-binary\"\n",
    )
    .unwrap();
    let output = run_meet(
        tmp.path(),
        None,
        &["doctor"],
        &[
            ("OPENAI_API_KEY", "sk-secret-value"),
            ("MEETEASE_CACHE_ROOT", "cache"),
        ],
    );
    let out = stdout(&output);
    assert!(!output.status.success(), "{out}");
    assert!(!out.contains("sk-secret-value"), "{out}");
    assert!(out.contains("(hidden)"), "{out}");
    assert!(out.contains("❌ OCR command runs"), "{out}");
    assert!(out.contains("Possible causes"), "{out}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_agenda_is_generated_once_through_hosted_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "1. Budget\n2. Hiring"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (tmp, _) = setup_test_env();
    let config = tmp.path().join("hosted.toml");
    fs::write(
        &config,
        format!(
            "[cache]\nroot = \"{}/cache\"\n[ocr]\nengine = \"disabled\"\n[transcription]\nprovider = \"disabled\"\n[api]\nmax_retries = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let dir = tmp.path().to_path_buf();
    let uri = server.uri();
    let outputs = tokio::task::spawn_blocking(move || {
        let env = [
            ("OPENAI_API_KEY", "test-key"),
            ("MEETEASE_API_BASE_URL", uri.as_str()),
        ];
        let ingested = run_meet(
            &dir,
            Some(&config),
            &["ingest", "--title", "Q3", "--date", "2024-07-01", "agenda.md"],
            &env,
        );
        assert!(ingested.status.success(), "{}", stderr(&ingested));
        let session = stdout(&ingested).lines().last().unwrap().trim().to_string();
        let first = run_meet(&dir, Some(&config), &["agenda", &session], &env);
        let second = run_meet(&dir, Some(&config), &["agenda", &session], &env);
        (first, second)
    })
    .await
    .unwrap();

    let (first, second) = outputs;
    assert!(first.status.success(), "{}", stderr(&first));
    assert_eq!(stdout(&first).trim(), "1. Budget\n2. Hiring");
    assert!(stderr(&first).contains("computed"));
    assert_eq!(stdout(&second), stdout(&first));
    assert!(stderr(&second).contains("cached"));
}
