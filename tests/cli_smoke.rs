mod support;

use assert_cmd::Command;
use predicates::str::contains;

use support::TestDir;

#[test]
fn ftask_help_works() {
    Command::cargo_bin("ftask")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("task list"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "add", "list", "edit", "advance", "status", "indent", "outdent", "move", "delete",
        "template", "reset", "import", "daemon",
    ];

    for cmd in subcommands {
        Command::cargo_bin("ftask")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn add_nest_and_complete_cascades() {
    let dir = TestDir::new();

    let parent = dir.json(&["add", "Groceries"]);
    assert_eq!(parent["schema_version"], "ftask.v1");
    assert_eq!(parent["command"], "add");
    assert_eq!(parent["status"], "success");
    let parent_id = parent["data"]["id"].as_str().unwrap().to_string();

    let child = dir.json(&["add", "Milk", "--parent", &parent_id[..8]]);
    assert_eq!(child["data"]["parent_id"], parent_id.as_str());
    let child_id = child["data"]["id"].as_str().unwrap().to_string();

    let done = dir.json(&["status", &child_id, "completed"]);
    assert_eq!(done["data"]["status"], "completed");
    assert_eq!(done["data"]["affected"], 2);

    let list = dir.json(&["list"]);
    let tasks = list["data"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["status"], "completed");
    assert_eq!(tasks[1]["depth"], 1);
}

#[test]
fn human_list_renders_tree() {
    let dir = TestDir::new();
    dir.cmd().args(["add", "Plan", "trip"]).assert().success();
    dir.cmd()
        .args(["list"])
        .assert()
        .success()
        .stdout(contains("Tasks"))
        .stdout(contains("[ ]"))
        .stdout(contains("Plan trip"));
}

#[test]
fn unknown_task_is_a_user_error() {
    let dir = TestDir::new();
    dir.cmd()
        .args(["advance", "nope"])
        .assert()
        .code(2)
        .stderr(contains("Task not found"))
        .stderr(contains("hint: ftask list"));
}

#[test]
fn empty_text_is_rejected() {
    let dir = TestDir::new();
    let out = dir.json(&["add", "   "]);
    assert_eq!(out["status"], "error");
    assert_eq!(out["error"]["kind"], "user_error");
}

#[test]
fn imported_goals_are_read_only_text() {
    let dir = TestDir::new();
    let snapshot = dir.write_file(
        "feeds/goals.json",
        r#"[{"id":"1","title":"Ship v1","completed":false,"parentId":null}]"#,
    );
    let snapshot = snapshot.to_str().unwrap();

    let applied = dir.json(&["import", "goals", snapshot]);
    assert_eq!(applied["command"], "import goals");
    assert_eq!(applied["data"]["added"], 2);

    let again = dir.json(&["import", "goals", snapshot]);
    assert_eq!(again["data"]["added"], 0);
    assert_eq!(again["data"]["updated"], 0);

    dir.cmd()
        .args(["edit", "goal-1", "renamed"])
        .assert()
        .code(3)
        .stderr(contains("read-only"));
}

#[test]
fn goal_completion_writes_toggle_to_outbox() {
    let dir = TestDir::new();
    dir.write_file("goals.json", r#"[{"id":"1","title":"Ship v1","completed":false}]"#);
    dir.write_config("[goals]\nsnapshot_file = \"goals.json\"\n");

    dir.cmd().args(["import", "goals"]).assert().success();
    let out = dir.json(&["status", "goal-1", "completed"]);
    assert_eq!(out["data"]["toggles"][0]["title"], "Ship v1");
    assert_eq!(out["data"]["toggles"][0]["outcome"], "requested");

    let outbox = dir.read_file("goal-toggles.jsonl");
    let record: serde_json::Value = serde_json::from_str(outbox.lines().next().unwrap()).unwrap();
    assert_eq!(record["title"], "Ship v1");
    assert_eq!(record["completed"], true);
}

#[test]
fn templates_generate_on_forced_reset() {
    let dir = TestDir::new();
    let template = dir.json(&["template", "add", "Stretch", "--every", "1", "--unit", "days"]);
    let template_id = template["data"]["id"].as_str().unwrap().to_string();
    dir.cmd()
        .args(["template", "sub", "add", &template_id, "Hamstrings"])
        .assert()
        .success();

    let reset = dir.json(&["reset", "--force"]);
    assert_eq!(reset["data"]["ran"], true);
    assert_eq!(reset["data"]["reset"]["generated"], 2);

    let list = dir.json(&["list"]);
    let texts: Vec<&str> = list["data"]["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["Stretch", "Hamstrings"]);
}

#[test]
fn events_flag_writes_jsonl() {
    let dir = TestDir::new();
    let events = dir.path().join("events.jsonl");
    dir.cmd()
        .args(["--events", events.to_str().unwrap(), "add", "Call mom"])
        .assert()
        .success();

    let content = std::fs::read_to_string(&events).unwrap();
    let event: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(event["schema_version"], "ftask.event.v1");
    assert_eq!(event["event"], "task_created");
    assert_eq!(event["data"]["text"], "Call mom");
}
