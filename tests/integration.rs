use std::{env, fs, path::PathBuf, process::Command};

const CONFIG: &str = r#"
[parameters]
iterations = 6
history_window_size = 4
list_size = 3
random_seed = 20200501

[data]
input_file = "input.toml"

[feature.protected]
protected_feature = "feature1"
protected_values = "a"

[agent.exposure]
preference_function_class = "binary"
metric_class = "proportional_item"
[agent.exposure.preference]
feature = "protected"
delta = 0.5
[agent.exposure.metric]
feature = "protected"
target = 0.5

[agent.long_tail]
preference_function_class = "ind_exponential"
metric_class = "gini"
[agent.long_tail.preference]
delta = 0.3
[agent.long_tail.metric]
target = 0.002

[choice]
choice_class = "voting"
[choice.properties]
rule = "borda"
tie_breaker = "lexicographic"

[allocation]
allocation_class = "product_lottery"
"#;

const INPUT: &str = r#"
recommendations = [
    ["u1", "i1", 3.5], ["u1", "i2", 2.5], ["u1", "i3", 1.5], ["u1", "i6", 1.0],
    ["u2", "i4", 3.5], ["u2", "i2", 2.5], ["u2", "i1", 2.5], ["u2", "i6", 0.5],
    ["u3", "i3", 1.5], ["u3", "i1", 3.5], ["u3", "i4", 3.5], ["u3", "i5", 0.5],
    ["u4", "i3", 1.5], ["u4", "i1", 3.5], ["u4", "i5", 3.5], ["u4", "i2", 1.0],
    ["u5", "i6", 2.0], ["u5", "i2", 1.0], ["u5", "i4", 0.5],
    ["u6", "i5", 4.0], ["u6", "i1", 3.0], ["u6", "i3", 2.0], ["u6", "i4", 1.0],
]

[items.i1]
feature1 = "a"
[items.i2]
feature1 = "b"
[items.i3]
feature1 = "a"
[items.i4]
feature1 = "b"
[items.i5]
feature1 = "a"
[items.i6]
feature1 = "b"
"#;

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    fs::write(test_dir.join("config.toml"), CONFIG).expect("failed to write config file");
    fs::write(test_dir.join("input.toml"), INPUT).expect("failed to write input file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_scruf"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    let trajectory_0 = fs::read(test_dir.join("run-0000/trajectory.msgpack"))
        .expect("failed to read trajectory");
    let trajectory_1 = fs::read(test_dir.join("run-0001/trajectory.msgpack"))
        .expect("failed to read trajectory");
    assert_eq!(trajectory_0, trajectory_1, "seeded runs should replay");

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);

    let results = fs::read_to_string(test_dir.join("run-0001/results.json"))
        .expect("failed to read results");
    let results: serde_json::Value =
        serde_json::from_str(&results).expect("failed to parse results");
    assert_eq!(results["n_rounds"], 6);
    assert!(results["agent_weight"]["long_tail"].is_object());
    assert_eq!(results["rbo"]["n_vals"], 6);
    assert!(results["final_fairness"]["exposure"]["evaluate"].is_f64());
    assert!(results["final_fairness"]["long_tail"]["evaluate_test"].is_f64());

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}
