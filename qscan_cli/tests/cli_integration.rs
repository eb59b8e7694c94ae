use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Theta sweeps 0 -> 1 at speed 2 with 0.1 s bins: 11 requested, 19 acquired.
const BASE: &str = r#"
[scan]
measurement = "preset_time"
measurement_time = 0.1
num_measurements = 11

[[scan.axes]]
motor = "theta"
start = 0.0
end = 1.0

[[scan.inputs]]
name = "i0"
mcs = "mcs1"
channel = 0

[[scan.inputs]]
name = "det"
mcs = "mcs1"
channel = 1

[bench]
virtual_time = true

[[bench.motors]]
name = "theta"
speed = 2.0
encoder = "delta"

[[bench.motors]]
name = "energy"
pseudo = { real = "theta", gain = 2.0, bias = 5.0 }

[[bench.mcs]]
name = "mcs1"
channels = [{ rate = 100.0 }, { motor = "theta", center = 0.5, fwhm = 0.2, height = 1e4 }]
"#;

fn write_config(dir: &tempfile::TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("qscan.toml");
    fs::write(&path, text).unwrap();
    path
}

fn qscan(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("qscan").unwrap();
    cmd.arg("--config").arg(cfg).env_remove("RUST_LOG");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["plan"], 0, "11 requested, 19 acquired", "stdout")]
#[case(&["self-check"], 0, "self-check ok: 2 motors, 1 scalers, 1 encoders", "stdout")]
#[case(&["run"], 0, "scan complete: 19 samples written", "stderr")]
#[case(&["frobnicate"], 2, "unrecognized subcommand", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, BASE);

    let assert = qscan(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => assert.stdout(predicate::str::contains(needle)),
        _ => assert.stderr(predicate::str::contains(needle)),
    };
}

#[test]
fn run_writes_every_sample_to_the_datafile() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, BASE);
    let out = dir.path().join("scan.csv");

    qscan(&cfg)
        .args(["run", "--datafile"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("theta: encoder (Delta)"));

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("theta,i0,det"));
    let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
    assert_eq!(rows.len(), 19);
    // 100 counts/s over a 0.1 s bin.
    assert!(rows.iter().all(|r| r[1] == "10"));
    let first: f64 = rows[0][0].parse().unwrap();
    let last: f64 = rows[18][0].parse().unwrap();
    assert!(first < 0.0 && last > 1.0, "extended range {first}..{last}");
}

#[test]
fn alternate_motor_replaces_the_axis_column() {
    let dir = tempdir().unwrap();
    let text = BASE.replace(
        "[[scan.inputs]]\nname = \"i0\"",
        "[scan.alternate]\ndatafile = [\"energy\"]\n\n[[scan.inputs]]\nname = \"i0\"",
    );
    let cfg = write_config(&dir, &text);
    let out = dir.path().join("scan.csv");
    let plot = dir.path().join("plot.csv");

    qscan(&cfg)
        .args(["run", "--datafile"])
        .arg(&out)
        .arg("--plotfile")
        .arg(&plot)
        .assert()
        .success();

    let data = fs::read_to_string(&out).unwrap();
    let plot = fs::read_to_string(&plot).unwrap();
    assert!(data.starts_with("energy,i0,det\n"));
    assert!(plot.starts_with("theta,i0,det\n"));
    for (d, p) in data.lines().skip(1).zip(plot.lines().skip(1)) {
        let e: f64 = d.split(',').next().unwrap().parse().unwrap();
        let t: f64 = p.split(',').next().unwrap().parse().unwrap();
        assert!((e - (2.0 * t + 5.0)).abs() < 1e-5, "{e} vs {t}");
    }
}

#[test]
fn plan_json_reports_the_extended_window() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, BASE);

    let output = qscan(&cfg).args(["--json", "plan"]).output().unwrap();
    assert!(output.status.success());
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(v["actual_num_measurements"], 19);
    assert_eq!(v["premove_measurements"], 2);
    assert_eq!(v["motors"][0]["motor"], "theta");
    assert!(v["motors"][0]["extended_start"].as_f64().unwrap() < 0.0);
}

#[rstest]
#[case("num_measurements = 11", "num_measurements = 1", "num_measurements must be >= 2")]
#[case("mcs = \"mcs1\"", "mcs = \"nope\"", "unknown mcs 'nope'")]
#[case("[bench]\nvirtual_time = true", "[bench]\nvirtual_time = true\nbogus = [", "qscan.toml")]
fn invalid_config_exits_with_configuration_code(
    #[case] from: &str,
    #[case] to: &str,
    #[case] needle: &str,
) {
    let dir = tempdir().unwrap();
    let text = BASE.replacen(from, to, 1);
    assert_ne!(text, BASE);
    let cfg = write_config(&dir, &text);

    qscan(&cfg)
        .arg("plan")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("What happened: Invalid configuration"))
        .stderr(predicate::str::contains(needle));
}

#[test]
fn missing_config_file_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("absent.toml");
    qscan(&cfg)
        .arg("plan")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("absent.toml"));
}

#[rstest]
#[case(
    "measurement = \"preset_time\"",
    "measurement = \"preset_count\"\npreset_count = 1000",
    "UnsupportedMeasurementKind"
)]
#[case(
    "measurement = \"preset_time\"",
    "measurement = \"preset_pulse_period\"",
    "NoClockAvailable"
)]
fn rejected_measurement_kinds_report_json_reason(
    #[case] from: &str,
    #[case] to: &str,
    #[case] reason: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &BASE.replacen(from, to, 1));
    let out = dir.path().join("scan.csv");

    let output = qscan(&cfg)
        .args(["--json", "run", "--datafile"])
        .arg(&out)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().last().unwrap();
    let v: serde_json::Value = serde_json::from_str(last).unwrap();
    assert_eq!(v["reason"], reason);
}

#[test]
fn pulse_generator_paces_the_scan() {
    let dir = tempdir().unwrap();
    let text = BASE
        .replacen(
            "measurement = \"preset_time\"",
            "measurement = \"preset_pulse_period\"",
            1,
        )
        .replacen(
            "virtual_time = true",
            "virtual_time = true\npulse_generator = \"pg1\"",
            1,
        );
    let cfg = write_config(&dir, &text);
    let out = dir.path().join("scan.csv");

    qscan(&cfg)
        .args(["run", "--datafile"])
        .arg(&out)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(&out).unwrap().lines().count(), 20);
}

#[test]
fn no_header_flag_drops_the_column_line() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, BASE);
    let out = dir.path().join("scan.csv");

    qscan(&cfg)
        .args(["run", "--no-header", "--datafile"])
        .arg(&out)
        .assert()
        .success();
    let text = fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 19);
    assert!(!text.starts_with("theta"));
}
