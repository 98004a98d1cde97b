use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn tirtha_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tirtha"))
}

struct Home {
    dir: TempDir,
}

impl Home {
    fn new(config: &str) -> Self {
        let dir = TempDir::new().expect("create temp home");
        fs::write(dir.path().join("tirtha.toml"), config).expect("write config");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(tirtha_bin())
            .args(args)
            .env("TIRTHA_HOME", self.path())
            .env_remove("TIRTHA_DB")
            .env_remove("TIRTHA_CONFIG")
            .env("RUST_LOG", "error")
            .output()
            .expect("failed to execute tirtha CLI")
    }

    fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> T {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "command failed: {}\nstdout:\n{}\nstderr:\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
            panic!(
                "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
                err,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )
        })
    }

    fn run_json_error(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        assert!(
            !output.status.success(),
            "command unexpectedly succeeded: {}\nstdout:\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout)
        );
        serde_json::from_slice(&output.stdout).expect("JSON error payload")
    }

    fn write(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }
}

const FAKE_TOOLS_CONFIG: &str = r#"
[scheduler]
contrib_delay_hours = 0.0

[worker]
poll_interval_ms = 20

[notify]
admin_emails = ["ops@tirtha.test"]

[[tools.av]]
name = "fake-mesh"
program = "sh"
args = ["-c", "printf glTF > {output}"]

[[tools.gs]]
name = "fake-splat"
program = "sh"
args = ["-c", "printf splat > {output}"]
"#;

#[derive(Debug, Deserialize)]
struct RunRow {
    id: String,
    kind: String,
    status: String,
    published_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkerRow {
    outcome: String,
}

#[test]
fn config_does_not_need_a_store() {
    let home = Home::new("[prerun]\nmin_matched_images = 3\n");
    let value: serde_json::Value = home.run_json(&["config", "--json"]);
    assert_eq!(value["config"]["prerun"]["min_matched_images"], 3);
    assert!(!home.path().join("tirtha.sqlite").exists());
}

#[test]
fn unknown_site_is_reported_as_json_error() {
    let home = Home::new("");
    let model = home.write("incoming/model.glb", b"glTF");
    let error = home.run_json_error(&[
        "create-manual-run",
        "nowhere",
        model.to_str().unwrap(),
        "--json",
    ]);
    let message = error["error"]["message"].as_str().unwrap();
    assert!(message.contains("Site not found: nowhere"), "{}", message);
}

#[test]
fn update_run_params_requires_a_field() {
    let home = Home::new("");
    let output = home.run(&["update-run-params", "0b0e5d0c-7c4a-4f3e-9d0a-2f1b8c6e4d21"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No viewer parameters given"));
}

#[test]
fn manual_run_mints_identifier() {
    let home = Home::new("");
    home.run_json::<serde_json::Value>(&[
        "site", "add", "Konark Sun Temple", "--verbose-id", "konark", "--json",
    ]);
    let model = home.write("incoming/konark.splat", b"splat");

    let report: serde_json::Value = home.run_json(&[
        "create-manual-run",
        "konark",
        model.to_str().unwrap(),
        "--ark-len",
        "6",
        "--json",
    ]);
    assert_eq!(report["kind"], "GS");
    assert_eq!(report["status"], "Manual");
    let ark = report["ark"].as_str().unwrap();
    assert!(ark.starts_with("999999/a"));
    assert_eq!(ark.len(), "999999/a".len() + 7);
    assert_eq!(fs::read(report["published"].as_str().unwrap()).unwrap(), b"splat");
}

#[test]
fn site_flags_can_be_toggled() {
    let home = Home::new("");
    home.run_json::<serde_json::Value>(&[
        "site", "add", "Lingaraj Temple", "--verbose-id", "lingaraj", "--json",
    ]);

    let error = home.run_json_error(&["site", "flag", "lingaraj", "--json"]);
    assert_eq!(error["error"]["message"], "No site flag given");

    let flagged: serde_json::Value = home.run_json(&[
        "site", "flag", "lingaraj", "--completed", "true", "--json",
    ]);
    assert_eq!(flagged["completed"], true);
    assert_eq!(flagged["hidden"], false);

    home.run_json::<serde_json::Value>(&["site", "flag", "lingaraj", "--hidden", "true", "--json"]);
    let sites: Vec<serde_json::Value> = home.run_json(&["site", "list", "--json"]);
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0]["completed"], true);
    assert_eq!(sites[0]["hidden"], true);

    home.run_json::<serde_json::Value>(&[
        "site", "flag", "lingaraj", "--completed", "false", "--json",
    ]);
    let sites: Vec<serde_json::Value> = home.run_json(&["site", "list", "--json"]);
    assert_eq!(sites[0]["completed"], false);
    assert_eq!(sites[0]["hidden"], true);
}

#[cfg(unix)]
#[test]
fn ingest_to_archive_and_replace() {
    let home = Home::new(FAKE_TOOLS_CONFIG);
    home.run_json::<serde_json::Value>(&[
        "site", "add", "Mukteswara Temple", "--verbose-id", "mukteswara",
        "--location", "Khordha, Odisha, India", "--json",
    ]);
    for idx in 0..12 {
        home.write(&format!("batch/img_{:02}.jpg", idx), &[0xFF, 0xD8, idx as u8]);
    }
    let batch = home.path().join("batch");

    let ingest: serde_json::Value = home.run_json(&[
        "ingest",
        "mukteswara",
        batch.to_str().unwrap(),
        "--email",
        "asha@contrib.test",
        "--json",
    ]);
    assert_eq!(ingest["images"], 12);

    let handled: Vec<WorkerRow> = home.run_json(&["worker", "--max-tasks", "2", "--json"]);
    assert_eq!(handled.len(), 2);
    assert!(handled.iter().all(|row| row.outcome == "completed"), "{:?}", handled);

    let runs: Vec<RunRow> = home.run_json(&["runs", "--site", "mukteswara", "--json"]);
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.status == "Done"));
    let av = runs.iter().find(|run| run.kind == "aV").unwrap();
    let file_name = av.published_file.as_deref().unwrap();
    assert!(file_name.ends_with(&format!("_{}.glb", av.id)));

    let archived: serde_json::Value = home.run_json(&["archive-run", &av.id, "--json"]);
    assert_eq!(archived["status"], "Archived");
    let archived_dir = PathBuf::from(archived["directory"].as_str().unwrap());
    assert!(archived_dir.starts_with(home.path().join("archive")));
    assert!(archived_dir.join("output").is_dir());

    let fixed = home.write("incoming/fixed.glb", b"glTF-fixed");
    let replaced: serde_json::Value = home.run_json(&[
        "replace-output",
        &av.id,
        fixed.to_str().unwrap(),
        "--operator",
        "curator",
        "--json",
    ]);
    let published = PathBuf::from(replaced["published"].as_str().unwrap());
    let backup = PathBuf::from(replaced["backup"].as_str().unwrap());
    assert_eq!(fs::read(&published).unwrap(), b"glTF-fixed");
    assert_eq!(fs::read(&backup).unwrap(), b"glTF");

    let wrong = home.write("incoming/wrong.splat", b"splat");
    let error = home.run_json_error(&[
        "replace-output",
        &av.id,
        wrong.to_str().unwrap(),
        "--operator",
        "curator",
        "--json",
    ]);
    assert!(error["error"]["message"].as_str().unwrap().contains("not allowed"));

    let queue: serde_json::Value = home.run_json(&["queue", "--json"]);
    assert_eq!(queue["queue"]["completed"], 2);
    assert_eq!(queue["queue"]["queued"], 0);

    let stats_dir = home.path().join("reports");
    let stats: serde_json::Value = home.run_json(&[
        "stats",
        "--output-dir",
        stats_dir.to_str().unwrap(),
        "--json",
    ]);
    let report_path = PathBuf::from(stats["path"].as_str().unwrap());
    assert!(report_path.starts_with(&stats_dir));
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["store"]["runs"], 2);
    assert_eq!(report["store"]["arks"], 2);
    assert_eq!(report["run_success_count"], 2);
}
