use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CREDENTIAL_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "GROQ_API_KEY",
    "ANTHROPIC_API_KEY",
    "UPSTASH_SEARCH_REST_URL",
    "UPSTASH_SEARCH_REST_TOKEN",
    "UPSTASH_REDIS_REST_URL",
    "UPSTASH_REDIS_REST_TOKEN",
    "LEJECHAT_STORAGE_PATH",
];

fn lejechat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lejechat");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let pages = serde_json::json!({
        "success": true,
        "data": [
            {
                "url": "https://udlejning.dk/",
                "markdown": "Velkommen til Udlejning. Vi udlejer lejligheder i hele Danmark.",
                "metadata": {
                    "title": "Udlejning",
                    "description": "Boliger til leje",
                    "ogImage": "https://udlejning.dk/og.png"
                }
            },
            {
                "url": "https://udlejning.dk/vilkaar",
                "markdown": "Depositum svarer til tre måneders husleje og betales inden indflytning. Forudbetalt leje svarer til en måneds husleje.",
                "metadata": { "title": "Lejevilkår" }
            }
        ]
    });
    let pages_path = root.join("crawl.json");
    fs::write(&pages_path, serde_json::to_string_pretty(&pages).unwrap()).unwrap();

    let config_content = format!(
        r#"[index]
provider = "local"
local_path = "{root}/index.json"

[storage]
backend = "file"
file_path = "{root}/indexes.json"

[logging]
level = "warn"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("lejechat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, pages_path)
}

fn run_lejechat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lejechat_binary();
    let mut command = Command::new(&binary);
    for var in CREDENTIAL_VARS {
        command.env_remove(var);
    }
    let output = command
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lejechat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn import(config_path: &Path, pages_path: &Path) -> String {
    let (stdout, stderr, success) = run_lejechat(
        config_path,
        &["import", "https://udlejning.dk", "--pages", pages_path.to_str().unwrap()],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);

    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("namespace:"))
        .map(|ns| ns.trim().to_string())
        .expect("import prints the namespace")
}

#[test]
fn test_import_creates_namespace() {
    let (_tmp, config_path, pages_path) = setup_test_env();

    let namespace = import(&config_path, &pages_path);
    assert!(namespace.starts_with("udlejning-dk-"));

    let (stdout, _, success) = run_lejechat(&config_path, &["indexes", "list"]);
    assert!(success);
    assert!(stdout.contains(&namespace));
    assert!(stdout.contains("https://udlejning.dk"));
}

#[test]
fn test_show_index_has_homepage_metadata() {
    let (_tmp, config_path, pages_path) = setup_test_env();
    let namespace = import(&config_path, &pages_path);

    let (stdout, stderr, success) = run_lejechat(&config_path, &["indexes", "show", &namespace]);
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("pages:     2"));
    assert!(stdout.contains("title:     Udlejning"));
    assert_eq!(stdout.matches("  - ").count(), 3);
}

#[test]
fn test_show_unknown_index_fails() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_lejechat(&config_path, &["indexes", "show", "ukendt-dk-1"]);
    assert!(!success);
    assert!(stderr.contains("index not found"));
}

#[test]
fn test_set_prompts_backfills_defaults() {
    let (_tmp, config_path, pages_path) = setup_test_env();
    let namespace = import(&config_path, &pages_path);

    let (stdout, stderr, success) = run_lejechat(
        &config_path,
        &["prompts", "set", &namespace, "Må jeg have hund?"],
    );
    assert!(success, "prompts set failed: {}", stderr);
    assert!(stdout.contains("  - Må jeg have hund?"));
    assert_eq!(stdout.matches("  - ").count(), 3);
}

#[test]
fn test_delete_index_removes_record() {
    let (_tmp, config_path, pages_path) = setup_test_env();
    let namespace = import(&config_path, &pages_path);

    let (_, _, success) = run_lejechat(&config_path, &["indexes", "delete", &namespace]);
    assert!(success);

    let (stdout, _, _) = run_lejechat(&config_path, &["indexes", "list"]);
    assert!(stdout.contains("No indexes."));
}

#[test]
fn test_ask_without_provider_keeps_sources() {
    let (_tmp, config_path, pages_path) = setup_test_env();
    let namespace = import(&config_path, &pages_path);

    let (stdout, stderr, success) =
        run_lejechat(&config_path, &["ask", &namespace, "Hvad er depositum?"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains(lejechat::pipeline::UPSTREAM_UNAVAILABLE_ANSWER));
    assert!(stdout.contains("https://udlejning.dk/vilkaar"));
}

#[test]
fn test_providers_without_keys() {
    let (_tmp, config_path, _) = setup_test_env();

    let (stdout, _, success) = run_lejechat(&config_path, &["providers"]);
    assert!(success);
    assert!(stdout.contains("openai"));
    assert!(stdout.contains("groq"));
    assert!(stdout.contains("anthropic"));
    assert!(!stdout.contains("ACTIVE"));
}

#[test]
fn test_import_empty_crawl_fails() {
    let (tmp, config_path, _) = setup_test_env();
    let empty = tmp.path().join("empty.json");
    fs::write(&empty, "[]").unwrap();

    let (_, stderr, success) = run_lejechat(
        &config_path,
        &["import", "https://udlejning.dk", "--pages", empty.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("No pages to import"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let (tmp, _, _) = setup_test_env();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_lejechat(&missing, &["providers"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
