// Multi-process tests: concurrent adds serialize, and tables outlive the writing process.
use std::process::{Command, Stdio};

use colshm::api::{BlobView, CatalogApiExt, LocalClient};

fn cmd(dir: &std::path::Path) -> Command {
    let exe = env!("CARGO_BIN_EXE_colshm");
    let mut command = Command::new(exe);
    command.args(["--dir", dir.to_str().unwrap(), "--capacity", "1048576"]);
    command
}

fn table_json(i: usize) -> String {
    let values = (0..=i).map(|v| v.to_string()).collect::<Vec<_>>().join(",");
    format!(r#"{{"columns": [{{"name": "k", "dtype": "int64", "values": [{values}]}}]}}"#)
}

#[test]
fn concurrent_adds_are_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("shm");

    let workers = 8;
    let mut children = Vec::new();
    for i in 0..workers {
        let input = temp.path().join(format!("t{i}.json"));
        std::fs::write(&input, table_json(i)).expect("write");
        let child = cmd(&dir)
            .args(["add", &format!("t{i}"), input.to_str().unwrap()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        children.push(child);
    }
    for mut child in children {
        let status = child.wait().expect("wait");
        assert!(status.success());
    }

    let client = LocalClient::new().with_segment_dir(&dir);
    let mut catalog = client.attach("colshm").expect("attach");
    assert_eq!(catalog.names().len(), workers);
    assert_eq!(catalog.segment().frame_count(), workers as u64);
    assert!(client.validate("colshm").expect("validate").is_ok());

    for i in 0..workers {
        let view = catalog.view(&format!("t{i}")).expect("view");
        let values = view.ints(0).expect("ints").collect::<Vec<_>>();
        assert_eq!(values, (0..=i as i64).collect::<Vec<_>>());
    }
}

#[test]
fn tables_survive_writer_exit_and_mutations_are_shared() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("shm");
    let input = temp.path().join("t.json");
    std::fs::write(&input, table_json(3)).expect("write");

    let add = cmd(&dir)
        .args(["add", "kept", input.to_str().unwrap()])
        .output()
        .expect("add");
    assert!(add.status.success());

    // attach after the writer process has exited
    let client = LocalClient::new().with_segment_dir(&dir);
    let mut catalog = client.attach("colshm").expect("attach");
    let before = BlobView::parse(catalog.get("kept").expect("get"))
        .expect("parse")
        .ints(0)
        .expect("ints")
        .collect::<Vec<_>>();
    assert_eq!(before, vec![0, 1, 2, 3]);

    // a second process mutates; this handle sees it without re-attaching
    let map = cmd(&dir)
        .args(["map", "kept", "k", "offset=100"])
        .output()
        .expect("map");
    assert!(map.status.success());
    let after = catalog.head("kept", 10).expect("head");
    assert_eq!(
        after.column("k").map(|column| column.data.clone()),
        Some(colshm::api::ColumnData::Int64(vec![100, 101, 102, 103]))
    );

    // and tables added by other processes become visible by name
    std::fs::write(&input, table_json(0)).expect("write");
    let add = cmd(&dir)
        .args(["add", "late", input.to_str().unwrap()])
        .output()
        .expect("add late");
    assert!(add.status.success());
    assert_eq!(catalog.head("late", 1).expect("head late").row_count(), Some(1));
}
